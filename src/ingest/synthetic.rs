//! Synthetic frame source.
//!
//! Produces a dark background with a bright square sweeping left to right,
//! which is enough to exercise brightness, motion and thumbnail paths without
//! a camera. Selected with source protocol `synthetic`.

use crate::definition::Params;
use crate::error::PipelineError;
use crate::frame::Frame;

use super::{SourceAddress, VideoSource};

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    /// Edge length of the moving square.
    pub square: u32,
    /// Frames per sweep across the image.
    pub sweep_frames: u64,
    /// End of stream after this many frames (reads fail afterwards).
    pub max_frames: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            square: 50,
            sweep_frames: 300,
            max_frames: None,
        }
    }
}

impl SyntheticConfig {
    /// Read `width`, `height`, `square`, `sweep_frames` and `max_frames` from
    /// source params, falling back to defaults for anything absent or invalid.
    pub fn from_params(params: &Params) -> Self {
        let defaults = Self::default();
        let get = |key: &str| params.get(key).and_then(|v| v.as_u64()).filter(|v| *v > 0);
        let width = get("width").map(|v| v as u32).unwrap_or(defaults.width);
        let height = get("height").map(|v| v as u32).unwrap_or(defaults.height);
        Self {
            width,
            height,
            square: get("square")
                .map(|v| v as u32)
                .unwrap_or(defaults.square)
                .min(width)
                .min(height),
            sweep_frames: get("sweep_frames").unwrap_or(defaults.sweep_frames),
            max_frames: get("max_frames"),
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    open: bool,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            open: false,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn render(&self) -> Result<Frame, PipelineError> {
        let SyntheticConfig {
            width,
            height,
            square,
            sweep_frames,
            ..
        } = self.config;
        let mut data = vec![16u8; (width as usize) * (height as usize) * 3];
        let travel = (width - square) as u64;
        let x0 = ((self.frame_count % sweep_frames) * travel / sweep_frames.max(1)) as u32;
        let y0 = (height - square) / 2;
        for y in y0..y0 + square {
            let row = (y as usize) * (width as usize);
            for x in x0..x0 + square {
                let idx = (row + x as usize) * 3;
                data[idx..idx + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        Frame::from_rgb(width, height, data).map_err(|e| PipelineError::FrameRead(e.to_string()))
    }
}

impl VideoSource for SyntheticSource {
    fn open(&mut self, address: &SourceAddress) -> Result<(), PipelineError> {
        self.open = true;
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            address,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, PipelineError> {
        if !self.open {
            return Err(PipelineError::FrameRead("source is not open".to_string()));
        }
        if self
            .config
            .max_frames
            .is_some_and(|max| self.frame_count >= max)
        {
            return Err(PipelineError::FrameRead("end of stream".to_string()));
        }
        let frame = self.render()?;
        self.frame_count += 1;
        Ok(frame)
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn release(&mut self) {
        if self.open {
            log::info!(
                "SyntheticSource: released after {} frames",
                self.frame_count
            );
        }
        self.open = false;
    }
}
