//! RTSP frame source.
//!
//! GStreamer pipeline: `rtspsrc ! decodebin ! videoconvert ! appsink` with RGB
//! caps. The credential-bearing location is set as an element property, so
//! it never appears in the pipeline description.

#![cfg(feature = "rtsp-gstreamer")]

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;

use super::{SourceAddress, VideoSource};
use crate::definition::Params;
use crate::error::PipelineError;
use crate::frame::Frame;

const DEFAULT_LATENCY_MS: u64 = 200;
const DEFAULT_FRAME_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

pub struct RtspSource {
    latency_ms: u64,
    frame_timeout: Duration,
    connect_timeout: Duration,
    session: Option<Session>,
    frame_count: u64,
    last_error: Option<String>,
}

struct Session {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
}

impl RtspSource {
    /// Params: `latency_ms` (jitter buffer, default 200),
    /// `frame_timeout_ms` (how long a read waits for a sample, default 2000)
    /// and `connect_timeout_ms` (how long `open` waits for playback, default
    /// 10000).
    pub fn new(params: &Params) -> Self {
        let get = |key: &str| params.get(key).and_then(|v| v.as_u64());
        Self {
            latency_ms: get("latency_ms").unwrap_or(DEFAULT_LATENCY_MS),
            frame_timeout: Duration::from_millis(
                get("frame_timeout_ms").unwrap_or(DEFAULT_FRAME_TIMEOUT_MS),
            ),
            connect_timeout: Duration::from_millis(
                get("connect_timeout_ms").unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            ),
            session: None,
            frame_count: 0,
            last_error: None,
        }
    }

    fn build_session(&self, address: &SourceAddress) -> Result<Session> {
        gstreamer::init().context("initialize gstreamer")?;

        let description = format!(
            "rtspsrc name=src latency={} ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            self.latency_ms
        );
        let pipeline = gstreamer::parse::launch(&description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let src = pipeline
            .by_name("src")
            .context("rtspsrc element missing from pipeline")?;
        src.set_property("location", address.expose());

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        if let Err(err) = wait_until_playing(&pipeline, self.connect_timeout) {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(err);
        }

        Ok(Session { pipeline, appsink })
    }

    fn poll_bus(&mut self) {
        let Some(session) = &self.session else {
            return;
        };
        let Some(bus) = session.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.last_error = Some("gstreamer reached EOS".to_string());
                }
                _ => {}
            }
        }
    }
}

impl VideoSource for RtspSource {
    fn open(&mut self, address: &SourceAddress) -> Result<(), PipelineError> {
        self.release();
        let session = self
            .build_session(address)
            .map_err(|e| PipelineError::SourceConnection(format!("{:#}", e)))?;
        self.session = Some(session);
        self.last_error = None;
        log::info!("RtspSource: connected to {}", address);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, PipelineError> {
        self.poll_bus();
        let timeout = gstreamer::ClockTime::from_mseconds(self.frame_timeout.as_millis() as u64);
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| PipelineError::FrameRead("source is not open".to_string()))?;
        let sample = session
            .appsink
            .try_pull_sample(timeout)
            .ok_or_else(|| PipelineError::FrameRead("RTSP stream stalled".to_string()))?;

        let (pixels, width, height) =
            sample_to_pixels(&sample).map_err(|e| PipelineError::FrameRead(format!("{:#}", e)))?;
        let frame = Frame::from_rgb(width, height, pixels)
            .map_err(|e| PipelineError::FrameRead(format!("{:#}", e)))?;

        self.frame_count += 1;
        Ok(frame)
    }

    fn is_open(&self) -> bool {
        self.session.is_some() && self.last_error.is_none()
    }

    fn release(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(err) = session.pipeline.set_state(gstreamer::State::Null) {
                log::warn!("RtspSource: failed to stop pipeline: {}", err);
            }
            log::info!("RtspSource: released after {} frames", self.frame_count);
        }
    }
}

impl Drop for RtspSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Block until the pipeline itself reports `Playing`. `set_state` returns
/// before the server has answered, so an unreachable camera only shows up
/// as a bus error or as silence.
fn wait_until_playing(pipeline: &gstreamer::Pipeline, timeout: Duration) -> Result<()> {
    use gstreamer::{MessageType, MessageView};

    let bus = pipeline.bus().context("RTSP pipeline has no bus")?;
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(anyhow!(
                "RTSP stream did not start within {} ms",
                timeout.as_millis()
            ));
        }
        let Some(message) = bus.timed_pop_filtered(
            gstreamer::ClockTime::from_mseconds(remaining.as_millis() as u64),
            &[MessageType::Error, MessageType::Eos, MessageType::StateChanged],
        ) else {
            continue;
        };
        match message.view() {
            MessageView::Error(err) => {
                return Err(anyhow!("RTSP stream failed to start: {}", err.error()));
            }
            MessageView::Eos(..) => return Err(anyhow!("RTSP stream ended before playing")),
            MessageView::StateChanged(changed)
                if changed.current() == gstreamer::State::Playing
                    && changed.src() == Some(pipeline.upcast_ref::<gstreamer::Object>()) =>
            {
                return Ok(());
            }
            _ => {}
        }
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let pixels = data
            .get(..row_bytes * height as usize)
            .context("RTSP buffer is shorter than its caps")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("RTSP buffer row is out of bounds")?,
        );
    }
    Ok((pixels, width, height))
}
