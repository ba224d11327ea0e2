use serde::Serialize;

use crate::definition::{Params, ProcessingType};

/// Axis-aligned box in pixel coordinates of the analysed frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One classified, localized finding within a frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<Params>,
}

/// Output of one processor for one frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProcessingResult {
    pub processor_kind: ProcessingType,
    pub frame_id: u64,
    pub timestamp: f64,
    pub detections: Vec<Detection>,
}

impl ProcessingResult {
    pub fn empty(processor_kind: ProcessingType, frame_id: u64, timestamp: f64) -> Self {
        Self {
            processor_kind,
            frame_id,
            timestamp,
            detections: Vec::new(),
        }
    }
}
