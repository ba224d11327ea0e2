use crate::frame::{mean_abs_diff, Frame};

/// Mean absolute gray difference (0..=255) above which a frame counts as
/// motion.
pub const MOTION_THRESHOLD: f64 = 25.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameMetrics {
    pub brightness: f64,
    pub motion_detected: Option<bool>,
}

/// Per-frame brightness and motion against a single prior frame.
///
/// Owns the only copy of the previous grayscale frame for its pipeline.
#[derive(Debug)]
pub struct FrameAnalyzer {
    threshold: f64,
    previous: Option<(u32, u32, Vec<u8>)>,
}

impl Default for FrameAnalyzer {
    fn default() -> Self {
        Self::new(MOTION_THRESHOLD)
    }
}

impl FrameAnalyzer {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            previous: None,
        }
    }

    pub fn analyze(&mut self, frame: &Frame) -> FrameMetrics {
        let gray = frame.to_gray();
        let brightness = if gray.is_empty() {
            0.0
        } else {
            gray.iter().map(|v| *v as u64).sum::<u64>() as f64 / gray.len() as f64
        };

        let motion_detected = match &self.previous {
            Some((w, h, prev)) if *w == frame.width && *h == frame.height => {
                mean_abs_diff(prev, &gray).map(|diff| diff > self.threshold)
            }
            _ => None,
        };
        self.previous = Some((frame.width, frame.height, gray));

        FrameMetrics {
            brightness,
            motion_detected,
        }
    }

    /// Forget the prior frame (after a reconnect the stream is discontinuous).
    pub fn reset(&mut self) {
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_has_no_motion_value() {
        let mut analyzer = FrameAnalyzer::default();
        let metrics = analyzer.analyze(&Frame::filled(4, 4, [100, 100, 100]).unwrap());
        assert_eq!(metrics.motion_detected, None);
        assert!((metrics.brightness - 100.0).abs() < 1e-9);
    }

    #[test]
    fn motion_follows_threshold() {
        let mut analyzer = FrameAnalyzer::default();
        analyzer.analyze(&Frame::filled(4, 4, [0, 0, 0]).unwrap());

        let above = analyzer.analyze(&Frame::filled(4, 4, [30, 30, 30]).unwrap());
        assert_eq!(above.motion_detected, Some(true));

        let below = analyzer.analyze(&Frame::filled(4, 4, [40, 40, 40]).unwrap());
        assert_eq!(below.motion_detected, Some(false));
    }

    #[test]
    fn size_change_and_reset_clear_history() {
        let mut analyzer = FrameAnalyzer::default();
        analyzer.analyze(&Frame::filled(4, 4, [0, 0, 0]).unwrap());
        let resized = analyzer.analyze(&Frame::filled(8, 4, [255, 255, 255]).unwrap());
        assert_eq!(resized.motion_detected, None);

        analyzer.reset();
        let after_reset = analyzer.analyze(&Frame::filled(8, 4, [0, 0, 0]).unwrap());
        assert_eq!(after_reset.motion_detected, None);
    }
}
