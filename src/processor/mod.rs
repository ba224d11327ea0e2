//! Frame processors and the registry that builds them.
//!
//! Each declared processing step becomes one `FrameProcessor` instance. The
//! executor never branches on step kind: it asks the `ProcessorRegistry` for a
//! processor and then only calls `process`.

use anyhow::Result;

use crate::definition::{Params, ProcessingStep, ProcessingType};
use crate::frame::Frame;

mod builtin;
mod motion;
mod registry;
#[cfg(feature = "remote-inference")]
mod remote;
mod result;

pub use builtin::InferencePlaceholder;
pub use motion::{MotionProcessor, DEFAULT_MOTION_THRESHOLD};
pub use registry::{ProcessorFactory, ProcessorRegistry};
#[cfg(feature = "remote-inference")]
pub use remote::RemoteProcessor;
pub use result::{BoundingBox, Detection, ProcessingResult};

/// Construction arguments shared by every processor kind.
#[derive(Clone, Debug)]
pub struct ProcessorSettings {
    /// Model identifier declared by the step.
    pub model_path: Option<String>,
    /// Minimum confidence a detection needs to be reported.
    pub confidence: f32,
    /// Kind-specific parameters.
    pub params: Params,
    /// Processing node address, for processors backed by a remote service.
    pub endpoint: Option<String>,
}

impl ProcessorSettings {
    pub fn from_step(step: &ProcessingStep, endpoint: Option<&str>) -> Self {
        Self {
            model_path: Some(step.model.clone()),
            confidence: step.confidence,
            params: step.params.clone(),
            endpoint: endpoint.map(str::to_string),
        }
    }
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            model_path: None,
            confidence: crate::definition::DEFAULT_CONFIDENCE,
            params: Params::new(),
            endpoint: None,
        }
    }
}

/// Analyzes one frame for one kind of signal.
///
/// Implementations must not touch state shared with other processors. Any
/// cross-frame memory (e.g. the previous frame for motion diffing) is owned
/// by the instance and documented on the type. An empty detection list is the
/// normal "nothing found" answer; `Err` is reserved for real failures, which
/// the executor logs and treats as empty for that frame.
pub trait FrameProcessor: Send {
    fn kind(&self) -> ProcessingType;

    fn process(&mut self, frame: &Frame, frame_id: u64, timestamp: f64)
        -> Result<ProcessingResult>;
}
