//! camfeed-validate - check a pipeline document without connecting to anything.
//!
//! Prints one summary per pipeline. Source credentials are shown redacted.
//! Exits non-zero when the document is invalid.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use camfeed::ingest::redact_uri;
use camfeed::{load_file, FeedSettings, ProcessorRegistry, SourceAddress};

#[derive(Parser, Debug)]
#[command(author, version, about = "Validate a camfeed pipeline document")]
struct Args {
    /// Pipeline document (YAML).
    file: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let pipelines = load_file(&args.file)
        .with_context(|| format!("invalid pipeline document {}", args.file.display()))?;
    let registry = ProcessorRegistry::with_builtins();

    for (name, definition) in &pipelines {
        let address = SourceAddress::from_source(&definition.source)
            .with_context(|| format!("pipeline {}: source address", name))?;
        let feed = FeedSettings::from_output(&definition.output)
            .with_context(|| format!("pipeline {}: output", name))?;

        println!("pipeline {}", name);
        println!("  source: {} ({})", address, definition.source.protocol);
        println!(
            "  processing: {} ({})",
            redact_uri(&definition.processing.uri),
            definition.processing.protocol
        );
        for step in definition.steps() {
            let registered = if registry.contains(step.kind) {
                ""
            } else {
                " [no processor registered]"
            };
            println!(
                "    - {} model={} confidence={:.2}{}",
                step.kind, step.model, step.confidence, registered
            );
        }
        println!(
            "  output: {} (serving {} on {}, max_items={})",
            redact_uri(&definition.output.uri),
            feed.feed_path, feed.bind_addr, feed.max_items
        );
    }
    println!("{} pipeline(s) OK", pipelines.len());
    Ok(())
}
