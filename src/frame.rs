//! Decoded video frames.
//!
//! Frames are packed RGB8, row-major, no padding. Sources hand them to the
//! executor, which lends them read-only to every processor and then to the
//! event sink for thumbnail persistence.

use anyhow::{anyhow, Result};
use image::RgbImage;
use serde::Serialize;

/// Width, height and channel count of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FrameDimensions {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

impl std::fmt::Display for FrameDimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap packed RGB8 pixels. Fails when the buffer length does not match
    /// `width * height * 3`.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Solid-color frame, mostly for tests and synthetic sources.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let pixels = (width as usize) * (height as usize);
        let data = rgb.iter().copied().cycle().take(pixels * 3).collect();
        Self::from_rgb(width, height, data)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn dimensions(&self) -> FrameDimensions {
        FrameDimensions {
            width: self.width,
            height: self.height,
            channels: 3,
        }
    }

    /// Single-channel luma (ITU-R BT.601 weights).
    pub fn to_gray(&self) -> Vec<u8> {
        self.data
            .chunks_exact(3)
            .map(|px| {
                let luma = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
                luma.round().clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    pub fn to_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))
    }
}

/// Mean absolute per-pixel difference of two equally sized gray buffers.
pub fn mean_abs_diff(a: &[u8], b: &[u8]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let total: u64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| x.abs_diff(*y) as u64)
        .sum();
    Some(total as f64 / a.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_abs_diff_requires_matching_sizes() {
        assert_eq!(mean_abs_diff(&[0, 10, 20, 30], &[10, 0, 20, 50]), Some(10.0));
        assert_eq!(mean_abs_diff(&[0, 1], &[0]), None);
        assert_eq!(mean_abs_diff(&[], &[]), None);
    }

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(Frame::from_rgb(4, 4, vec![0; 47]).is_err());
        assert!(Frame::from_rgb(0, 4, vec![]).is_err());
        assert!(Frame::from_rgb(4, 4, vec![0; 48]).is_ok());
    }

    #[test]
    fn gray_uses_luma_weights() {
        let white = Frame::filled(2, 2, [255, 255, 255]).unwrap();
        assert_eq!(white.to_gray(), vec![255; 4]);

        let red = Frame::filled(1, 1, [255, 0, 0]).unwrap();
        assert_eq!(red.to_gray(), vec![76]);
    }

    #[test]
    fn dimensions_report_rgb() {
        let frame = Frame::filled(640, 480, [0, 0, 0]).unwrap();
        assert_eq!(frame.dimensions().to_string(), "640x480x3");
        assert_eq!(frame.to_image().unwrap().dimensions(), (640, 480));
    }
}
