use anyhow::{anyhow, Result};
use serde_json::json;

use super::{BoundingBox, Detection, FrameProcessor, ProcessingResult, ProcessorSettings};
use crate::definition::{Params, ProcessingType};
use crate::frame::{mean_abs_diff, Frame};

/// Mean gray-level difference (0..255) above which a frame counts as motion.
pub const DEFAULT_MOTION_THRESHOLD: f64 = 25.0;

const MOTION_CONFIDENCE: f32 = 0.85;

/// Frame-differencing motion detector.
///
/// Keeps exactly one prior grayscale frame. The first frame, and any frame
/// whose size differs from the previous one, only primes that buffer.
///
/// Params: `threshold` (mean difference, default 25) and `pixel_threshold`
/// (per-pixel difference counted as changed when sizing the box, defaults to
/// `threshold`).
pub struct MotionProcessor {
    threshold: f64,
    pixel_threshold: u8,
    min_confidence: f32,
    previous: Option<(u32, u32, Vec<u8>)>,
}

impl MotionProcessor {
    pub fn new(settings: ProcessorSettings) -> Result<Self> {
        let threshold = number_param(&settings.params, "threshold")?
            .unwrap_or(DEFAULT_MOTION_THRESHOLD);
        if !(0.0..=255.0).contains(&threshold) {
            return Err(anyhow!("motion threshold {} is outside [0, 255]", threshold));
        }
        let pixel_threshold = number_param(&settings.params, "pixel_threshold")?
            .unwrap_or(threshold)
            .clamp(0.0, 255.0) as u8;
        Ok(Self {
            threshold,
            pixel_threshold,
            min_confidence: settings.confidence,
            previous: None,
        })
    }

    fn changed_region(&self, previous: &[u8], current: &[u8], width: u32) -> Option<BoundingBox> {
        let width = width as usize;
        let mut min_x = usize::MAX;
        let mut min_y = usize::MAX;
        let mut max_x = 0;
        let mut max_y = 0;
        for (idx, (a, b)) in previous.iter().zip(current).enumerate() {
            if a.abs_diff(*b) > self.pixel_threshold {
                let (x, y) = (idx % width, idx / width);
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }
        if min_x == usize::MAX {
            return None;
        }
        Some(BoundingBox {
            x: min_x as f32,
            y: min_y as f32,
            width: (max_x - min_x + 1) as f32,
            height: (max_y - min_y + 1) as f32,
        })
    }
}

impl FrameProcessor for MotionProcessor {
    fn kind(&self) -> ProcessingType {
        ProcessingType::MotionDetection
    }

    fn process(&mut self, frame: &Frame, frame_id: u64, timestamp: f64) -> Result<ProcessingResult> {
        let gray = frame.to_gray();
        let mut result = ProcessingResult::empty(self.kind(), frame_id, timestamp);

        if let Some((width, height, previous)) = &self.previous {
            if *width == frame.width && *height == frame.height {
                let mean = mean_abs_diff(previous, &gray).unwrap_or(0.0);
                if mean > self.threshold && MOTION_CONFIDENCE >= self.min_confidence {
                    let full = BoundingBox {
                        x: 0.0,
                        y: 0.0,
                        width: frame.width as f32,
                        height: frame.height as f32,
                    };
                    let bbox = self
                        .changed_region(previous, &gray, frame.width)
                        .unwrap_or(full);
                    let mut extra = Params::new();
                    extra.insert("mean_difference".into(), json!(mean));
                    result.detections.push(Detection {
                        class_name: "motion".to_string(),
                        confidence: MOTION_CONFIDENCE,
                        bbox,
                        additional_data: Some(extra),
                    });
                }
            }
        }

        self.previous = Some((frame.width, frame.height, gray));
        Ok(result)
    }
}

fn number_param(params: &Params, key: &str) -> Result<Option<f64>> {
    match params.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| anyhow!("motion param '{}' must be a number", key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_square(x0: u32, y0: u32, size: u32) -> Frame {
        let (w, h) = (16u32, 16u32);
        let mut data = vec![0u8; (w * h * 3) as usize];
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                let idx = ((y * w + x) * 3) as usize;
                data[idx..idx + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        Frame::from_rgb(w, h, data).unwrap()
    }

    #[test]
    fn first_frame_only_primes_buffer() {
        let mut motion = MotionProcessor::new(ProcessorSettings::default()).unwrap();
        let result = motion.process(&frame_with_square(0, 0, 8), 0, 0.0).unwrap();
        assert!(result.detections.is_empty());
    }

    #[test]
    fn large_change_reports_box_around_changed_pixels() {
        let mut motion = MotionProcessor::new(ProcessorSettings::default()).unwrap();
        motion.process(&Frame::filled(16, 16, [0, 0, 0]).unwrap(), 0, 0.0).unwrap();

        // 64 of 256 pixels jump to 255: mean difference 63.75.
        let result = motion.process(&frame_with_square(4, 2, 8), 1, 0.1).unwrap();
        assert_eq!(result.detections.len(), 1);
        let det = &result.detections[0];
        assert_eq!(det.class_name, "motion");
        assert_eq!(
            det.bbox,
            BoundingBox {
                x: 4.0,
                y: 2.0,
                width: 8.0,
                height: 8.0
            }
        );
    }

    #[test]
    fn small_change_is_ignored() {
        let mut motion = MotionProcessor::new(ProcessorSettings::default()).unwrap();
        motion.process(&Frame::filled(16, 16, [0, 0, 0]).unwrap(), 0, 0.0).unwrap();

        // 4 of 256 pixels change: mean difference ~4.
        let result = motion.process(&frame_with_square(0, 0, 2), 1, 0.1).unwrap();
        assert!(result.detections.is_empty());
    }

    #[test]
    fn resolution_change_resets_buffer() {
        let mut motion = MotionProcessor::new(ProcessorSettings::default()).unwrap();
        motion.process(&Frame::filled(8, 8, [0, 0, 0]).unwrap(), 0, 0.0).unwrap();
        let result = motion
            .process(&Frame::filled(16, 16, [255, 255, 255]).unwrap(), 1, 0.1)
            .unwrap();
        assert!(result.detections.is_empty());
    }

    #[test]
    fn rejects_non_numeric_threshold() {
        let mut params = Params::new();
        params.insert("threshold".into(), json!("high"));
        let settings = ProcessorSettings {
            params,
            ..ProcessorSettings::default()
        };
        assert!(MotionProcessor::new(settings).is_err());
    }
}
