//! camfeedd - run one camera pipeline and serve its event feed
//!
//! This daemon:
//! 1. Loads the pipeline document and picks one pipeline
//! 2. Builds its processor chain from the default registry
//! 3. Serves the RSS feed and thumbnails over HTTP
//! 4. Streams frames until Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use camfeed::config::DaemonConfig;
use camfeed::{
    load_file, open_source, EventSink, PipelineExecutor, ProcessorRegistry, SourceAddress,
    StopSignal,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a camera pipeline and publish its RSS event feed")]
struct Args {
    /// Pipeline document (YAML). Overrides CAMFEED_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pipeline name to run. Required when the document defines several.
    #[arg(long)]
    pipeline: Option<String>,

    /// Feed server bind address (host:port).
    #[arg(long)]
    bind: Option<String>,

    /// Directory for thumbnails.
    #[arg(long)]
    images_dir: Option<PathBuf>,

    /// Target milliseconds between frames.
    #[arg(long)]
    frame_period_ms: Option<u64>,

    /// Milliseconds to wait after a failed read.
    #[arg(long)]
    retry_delay_ms: Option<u64>,
}

impl Args {
    fn apply(self, cfg: &mut DaemonConfig) {
        if let Some(path) = self.config {
            cfg.pipeline_path = path;
        }
        if let Some(name) = self.pipeline {
            cfg.pipeline = Some(name);
        }
        if let Some(addr) = self.bind {
            cfg.bind_addr = Some(addr);
        }
        if let Some(dir) = self.images_dir {
            cfg.images_dir = Some(dir);
        }
        if let Some(ms) = self.frame_period_ms {
            cfg.frame_period = Duration::from_millis(ms);
        }
        if let Some(ms) = self.retry_delay_ms {
            cfg.retry_delay = Duration::from_millis(ms);
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = DaemonConfig::load()?;
    args.apply(&mut cfg);
    cfg.validate()?;

    let pipelines = load_file(&cfg.pipeline_path)
        .with_context(|| format!("load pipelines from {}", cfg.pipeline_path.display()))?;
    let definition = cfg.select(pipelines)?;
    let address = SourceAddress::from_source(&definition.source).context("source address")?;
    log::info!(
        "camfeedd {} running pipeline={} source={}",
        env!("CARGO_PKG_VERSION"),
        definition.name,
        address
    );

    let sink = Arc::new(EventSink::new(cfg.feed_settings(&definition)?));
    let registry = ProcessorRegistry::with_builtins();
    let mut executor = PipelineExecutor::new(
        definition.clone(),
        &registry,
        Arc::clone(&sink),
        cfg.executor_options(),
    )?;
    let mut source = open_source(&definition.source)?;

    let server = sink.serve()?;
    log::info!("feed available at http://{}{}", server.addr, sink.settings().feed_path);

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.stop()).context("install Ctrl-C handler")?;

    let result = executor.run(source.as_mut(), &stop);
    log::info!("pipeline stopped, shutting down feed server...");
    server.stop()?;
    result?;

    let stats = executor.stats();
    log::info!(
        "camfeedd exiting: frames={} read_failures={} processor_failures={} reconnects={}",
        stats.frames_processed,
        stats.read_failures,
        stats.processor_failures,
        stats.reconnects
    );
    Ok(())
}
