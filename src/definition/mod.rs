//! Pipeline definitions.
//!
//! A `PipelineDefinition` is the immutable description of one monitoring
//! pipeline: where frames come from, which analysis steps run on each frame
//! (in declaration order), and where derived events are published.
//!
//! Definitions are produced only by [`load`], which validates every endpoint
//! address before anything is allowed to connect to it.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

mod loader;
mod uri;

pub use loader::{load, load_file};
pub use uri::validate_uri;

/// Free-form parameter mapping attached to sources, steps and outputs.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Confidence threshold applied when a step omits one.
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

/// Kind of analysis a processing step performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingType {
    ObjectDetection,
    FaceDetection,
    MotionDetection,
    LicensePlate,
    CrowdCounting,
    Custom,
}

impl ProcessingType {
    pub const ALL: [ProcessingType; 6] = [
        ProcessingType::ObjectDetection,
        ProcessingType::FaceDetection,
        ProcessingType::MotionDetection,
        ProcessingType::LicensePlate,
        ProcessingType::CrowdCounting,
        ProcessingType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingType::ObjectDetection => "object_detection",
            ProcessingType::FaceDetection => "face_detection",
            ProcessingType::MotionDetection => "motion_detection",
            ProcessingType::LicensePlate => "license_plate",
            ProcessingType::CrowdCounting => "crowd_counting",
            ProcessingType::Custom => "custom",
        }
    }
}

impl fmt::Display for ProcessingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ProcessingType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| {
                let known: Vec<&str> = ProcessingType::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown step type '{}'; expected one of {}", value, known.join(", "))
            })
    }
}

/// Source login. The password never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct StreamSource {
    pub uri: String,
    pub protocol: String,
    pub credentials: Option<Credentials>,
    pub params: Params,
}

#[derive(Clone, Debug)]
pub struct ProcessingStep {
    pub kind: ProcessingType,
    pub model: String,
    pub confidence: f32,
    pub params: Params,
}

#[derive(Clone, Debug)]
pub struct ProcessingNode {
    pub uri: String,
    pub protocol: String,
    pub steps: Vec<ProcessingStep>,
}

#[derive(Clone, Debug)]
pub struct StreamOutput {
    pub uri: String,
    pub protocol: String,
    pub format: String,
    pub params: Params,
}

/// One validated source -> processing -> output chain.
#[derive(Clone, Debug)]
pub struct PipelineDefinition {
    pub name: String,
    pub source: StreamSource,
    pub processing: ProcessingNode,
    pub output: StreamOutput,
}

impl PipelineDefinition {
    /// Processing steps in dispatch order.
    pub fn steps(&self) -> &[ProcessingStep] {
        &self.processing.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_type_round_trips_through_str() {
        for kind in ProcessingType::ALL {
            assert_eq!(kind.as_str().parse::<ProcessingType>().unwrap(), kind);
        }
        assert!("vehicle_tracking".parse::<ProcessingType>().is_err());
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("admin", "pass123");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("pass123"));
    }
}
