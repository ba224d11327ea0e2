use thiserror::Error;

use crate::definition::ProcessingType;

/// Failures surfaced by the pipeline engine.
///
/// Only `Configuration`, `UnknownProcessorKind` and `SourceConnection` stop a
/// pipeline. The per-frame variants are logged and recovered from.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration at `{field}`: {reason}")]
    Configuration { field: String, reason: String },

    #[error("no processor registered for kind `{0}`")]
    UnknownProcessorKind(ProcessingType),

    #[error("failed to connect to video source: {0}")]
    SourceConnection(String),

    #[error("failed to read frame: {0}")]
    FrameRead(String),

    #[error("processor `{kind}` failed: {reason}")]
    Processor { kind: ProcessingType, reason: String },

    #[error("failed to persist event image: {0}")]
    Persistence(String),
}

impl PipelineError {
    pub(crate) fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that must halt the pipeline.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::UnknownProcessorKind(_) | Self::SourceConnection(_)
        )
    }
}
