use anyhow::Result;

use super::{FrameProcessor, ProcessingResult, ProcessorSettings};
use crate::definition::ProcessingType;
use crate::frame::Frame;

/// Stand-in for an inference kind with no local model attached.
///
/// Always reports an empty detection list, so the rest of the pipeline
/// (metrics, thumbnails, feed) keeps running while the analysis itself is
/// provided elsewhere.
pub struct InferencePlaceholder {
    kind: ProcessingType,
    settings: ProcessorSettings,
}

impl InferencePlaceholder {
    pub fn new(kind: ProcessingType, settings: ProcessorSettings) -> Self {
        log::info!(
            "{} processor: no inference backend for model {:?}; reporting empty detections",
            kind,
            settings.model_path.as_deref().unwrap_or("<none>")
        );
        Self { kind, settings }
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }
}

impl FrameProcessor for InferencePlaceholder {
    fn kind(&self) -> ProcessingType {
        self.kind
    }

    fn process(&mut self, _frame: &Frame, frame_id: u64, timestamp: f64) -> Result<ProcessingResult> {
        Ok(ProcessingResult::empty(self.kind, frame_id, timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_reports_no_detections() {
        let settings = ProcessorSettings {
            model_path: Some("yolov5s".into()),
            confidence: 0.7,
            ..ProcessorSettings::default()
        };
        let mut processor = InferencePlaceholder::new(ProcessingType::LicensePlate, settings);
        let frame = Frame::filled(8, 8, [10, 20, 30]).unwrap();

        let result = processor.process(&frame, 3, 12.5).unwrap();
        assert_eq!(result.processor_kind, ProcessingType::LicensePlate);
        assert_eq!(result.frame_id, 3);
        assert_eq!(result.timestamp, 12.5);
        assert!(result.detections.is_empty());
        assert_eq!(processor.settings().confidence, 0.7);
    }
}
