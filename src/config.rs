use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::definition::PipelineDefinition;
use crate::executor::ExecutorOptions;
use crate::sink::FeedSettings;

const DEFAULT_PIPELINE_PATH: &str = "pipelines.yaml";

/// Runtime settings for `camfeedd`, separate from the pipeline document.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Pipeline document to load.
    pub pipeline_path: PathBuf,
    /// Pipeline to run; may be omitted when the document defines exactly one.
    pub pipeline: Option<String>,
    /// Overrides the feed bind address derived from the output URI.
    pub bind_addr: Option<String>,
    /// Overrides the thumbnail directory from the output params.
    pub images_dir: Option<PathBuf>,
    pub frame_period: Duration,
    pub retry_delay: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let options = ExecutorOptions::default();
        Self {
            pipeline_path: PathBuf::from(DEFAULT_PIPELINE_PATH),
            pipeline: None,
            bind_addr: None,
            images_dir: None,
            frame_period: options.frame_period,
            retry_delay: options.retry_delay,
        }
    }
}

impl DaemonConfig {
    /// Defaults overlaid with `CAMFEED_*` environment variables.
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_var("CAMFEED_CONFIG") {
            self.pipeline_path = PathBuf::from(path);
        }
        if let Some(name) = non_empty_var("CAMFEED_PIPELINE") {
            self.pipeline = Some(name);
        }
        if let Some(addr) = non_empty_var("CAMFEED_BIND_ADDR") {
            self.bind_addr = Some(addr);
        }
        if let Some(dir) = non_empty_var("CAMFEED_IMAGES_DIR") {
            self.images_dir = Some(PathBuf::from(dir));
        }
        if let Some(ms) = non_empty_var("CAMFEED_FRAME_PERIOD_MS") {
            self.frame_period = parse_millis("CAMFEED_FRAME_PERIOD_MS", &ms)?;
        }
        if let Some(ms) = non_empty_var("CAMFEED_RETRY_DELAY_MS") {
            self.retry_delay = parse_millis("CAMFEED_RETRY_DELAY_MS", &ms)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline_path.as_os_str().is_empty() {
            return Err(anyhow!("pipeline document path must not be empty"));
        }
        if self.retry_delay.is_zero() {
            return Err(anyhow!("retry delay must be greater than zero"));
        }
        if let Some(addr) = &self.bind_addr {
            if !addr.contains(':') {
                return Err(anyhow!("bind address '{}' must be host:port", addr));
            }
        }
        Ok(())
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            frame_period: self.frame_period,
            retry_delay: self.retry_delay,
            ..ExecutorOptions::default()
        }
    }

    /// Pick the configured pipeline out of a loaded document.
    pub fn select(
        &self,
        mut pipelines: BTreeMap<String, PipelineDefinition>,
    ) -> Result<PipelineDefinition> {
        match &self.pipeline {
            Some(name) => pipelines.remove(name).ok_or_else(|| {
                anyhow!(
                    "pipeline '{}' not found (available: {})",
                    name,
                    pipelines.keys().cloned().collect::<Vec<_>>().join(", ")
                )
            }),
            None if pipelines.len() == 1 => pipelines
                .into_values()
                .next()
                .ok_or_else(|| anyhow!("pipeline document is empty")),
            None => Err(anyhow!(
                "document defines {} pipelines; choose one with --pipeline (available: {})",
                pipelines.len(),
                pipelines.keys().cloned().collect::<Vec<_>>().join(", ")
            )),
        }
    }

    /// Feed settings for `definition` with daemon overrides applied.
    pub fn feed_settings(&self, definition: &PipelineDefinition) -> Result<FeedSettings> {
        let mut settings = FeedSettings::from_output(&definition.output)?;
        if let Some(addr) = &self.bind_addr {
            settings.bind_addr = addr.clone();
        }
        if let Some(dir) = &self.images_dir {
            settings.images_dir = dir.clone();
        }
        Ok(settings)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    let ms: u64 = value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} must be an integer number of milliseconds", key))?;
    Ok(Duration::from_millis(ms))
}
