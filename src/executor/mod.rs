//! Pipeline executor.
//!
//! States: `Idle -> Connecting -> Streaming <-> Reconnecting -> Stopped`.
//!
//! - A failed open is fatal (`SourceConnection`).
//! - A failed read is transient: warn, wait `retry_delay`, read again. The
//!   executor stays in `Streaming` while the source reports itself open and
//!   moves to `Reconnecting` (re-open with the same address) otherwise.
//! - Each frame is handed to every processor on its own scoped thread; the
//!   loop waits for all of them before assembling the event.
//! - The source is released on every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::definition::{PipelineDefinition, ProcessingType};
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::ingest::{SourceAddress, SourceGuard, VideoSource};
use crate::processor::{FrameProcessor, ProcessingResult, ProcessorRegistry, ProcessorSettings};
use crate::sink::{EventSink, FrameEvent};

mod metrics;

pub use metrics::{FrameAnalyzer, FrameMetrics, MOTION_THRESHOLD};

const STOP_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    Idle,
    Connecting,
    Streaming,
    Reconnecting,
    Stopped,
}

#[derive(Clone, Debug)]
pub struct ExecutorOptions {
    /// Target time between frame reads.
    pub frame_period: Duration,
    /// Pause after a failed read or reconnect attempt.
    pub retry_delay: Duration,
    pub health_interval: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            frame_period: Duration::from_secs(1) / 30,
            retry_delay: Duration::from_secs(1),
            health_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    pub frames_processed: u64,
    pub read_failures: u64,
    pub processor_failures: u64,
    pub reconnects: u64,
}

/// Cooperative cancellation shared between the executor and whoever stops it.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in short slices. Returns false if stopped.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(STOP_POLL));
        }
    }
}

pub struct PipelineExecutor {
    definition: PipelineDefinition,
    processors: Vec<Box<dyn FrameProcessor>>,
    sink: Arc<EventSink>,
    options: ExecutorOptions,
    analyzer: FrameAnalyzer,
    state: ExecutorState,
    stats: ExecutorStats,
    next_frame_id: u64,
}

impl PipelineExecutor {
    /// Build the processor chain for `definition`. Fails before anything
    /// connects if a step kind is unknown or a processor rejects its settings.
    pub fn new(
        definition: PipelineDefinition,
        registry: &ProcessorRegistry,
        sink: Arc<EventSink>,
        options: ExecutorOptions,
    ) -> Result<Self, PipelineError> {
        let endpoint = definition.processing.uri.as_str();
        let mut processors = Vec::with_capacity(definition.steps().len());
        for step in definition.steps() {
            let settings = ProcessorSettings::from_step(step, Some(endpoint));
            processors.push(registry.create(step.kind, settings)?);
        }
        log::info!(
            "pipeline={} processors=[{}]",
            definition.name,
            processors
                .iter()
                .map(|p| p.kind().as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self {
            definition,
            processors,
            sink,
            options,
            analyzer: FrameAnalyzer::default(),
            state: ExecutorState::Idle,
            stats: ExecutorStats::default(),
            next_frame_id: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats
    }

    /// Connect `source` and stream until `stop` is raised.
    ///
    /// Returns `SourceConnection` if the first open fails. Read failures never
    /// end the run.
    pub fn run(&mut self, source: &mut dyn VideoSource, stop: &StopSignal) -> Result<(), PipelineError> {
        let mut guard = SourceGuard::new(source);
        self.transition(ExecutorState::Connecting);
        let connected = SourceAddress::from_source(&self.definition.source)
            .map_err(|e| PipelineError::config("source.uri", format!("{:#}", e)))
            .and_then(|address| connect(guard.source(), &address).map(|()| address));
        let address = match connected {
            Ok(address) => address,
            Err(err) => {
                self.transition(ExecutorState::Stopped);
                log::error!("pipeline={} {}", self.definition.name, err);
                return Err(err);
            }
        };
        log::info!("pipeline={} source={} connected", self.definition.name, address);
        self.transition(ExecutorState::Streaming);

        let mut last_health_log = Instant::now();
        while !stop.is_stopped() {
            if last_health_log.elapsed() >= self.options.health_interval {
                self.log_health();
                last_health_log = Instant::now();
            }

            if self.state == ExecutorState::Reconnecting {
                match connect(guard.source(), &address) {
                    Ok(()) => {
                        self.stats.reconnects += 1;
                        self.analyzer.reset();
                        log::info!("pipeline={} source={} reconnected", self.definition.name, address);
                        self.transition(ExecutorState::Streaming);
                    }
                    Err(err) => {
                        log::warn!("pipeline={} {}", self.definition.name, err);
                        if !stop.sleep(self.options.retry_delay) {
                            break;
                        }
                    }
                }
                continue;
            }

            let started = Instant::now();
            let frame = match guard.source().read_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    self.stats.read_failures += 1;
                    log::warn!(
                        "pipeline={} frame={} {}",
                        self.definition.name,
                        self.next_frame_id,
                        err
                    );
                    if !guard.source().is_open() {
                        self.transition(ExecutorState::Reconnecting);
                    }
                    if !stop.sleep(self.options.retry_delay) {
                        break;
                    }
                    continue;
                }
            };

            let frame_id = self.next_frame_id;
            self.next_frame_id += 1;
            if let Err(err) = self.process_frame(&frame, frame_id, unix_now()) {
                log::error!("pipeline={} frame={} {:#}", self.definition.name, frame_id, err);
            }

            let wait = self.options.frame_period.saturating_sub(started.elapsed());
            if !wait.is_zero() && !stop.sleep(wait) {
                break;
            }
        }

        self.transition(ExecutorState::Stopped);
        self.log_health();
        Ok(())
    }

    /// Run every processor on `frame`, compute frame metrics and append the
    /// resulting event (with its thumbnail) to the sink.
    ///
    /// A failing processor contributes an empty result; it never aborts the
    /// frame.
    pub fn process_frame(&mut self, frame: &Frame, frame_id: u64, timestamp: f64) -> Result<FrameEvent> {
        let outcomes = dispatch(&mut self.processors, frame, frame_id, timestamp);

        let mut results = Vec::with_capacity(outcomes.len());
        for (kind, outcome) in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(err) => {
                    self.stats.processor_failures += 1;
                    let err = PipelineError::Processor {
                        kind,
                        reason: format!("{:#}", err),
                    };
                    log::warn!(
                        "pipeline={} frame={} processor={} {}",
                        self.definition.name,
                        frame_id,
                        kind,
                        err
                    );
                    results.push(ProcessingResult::empty(kind, frame_id, timestamp));
                }
            }
        }

        let metrics = self.analyzer.analyze(frame);
        let event = FrameEvent {
            frame_id,
            timestamp,
            dimensions: frame.dimensions(),
            brightness: metrics.brightness,
            motion_detected: metrics.motion_detected,
            results,
            image_url: None,
        };
        let image_url = self.sink.append(event.clone(), Some(frame))?;
        self.stats.frames_processed += 1;

        Ok(FrameEvent { image_url, ..event })
    }

    fn transition(&mut self, next: ExecutorState) {
        if self.state != next {
            log::debug!(
                "pipeline={} state {:?} -> {:?}",
                self.definition.name,
                self.state,
                next
            );
            self.state = next;
        }
    }

    fn log_health(&self) {
        log::info!(
            "pipeline={} state={:?} frames={} read_failures={} processor_failures={} reconnects={} events={}",
            self.definition.name,
            self.state,
            self.stats.frames_processed,
            self.stats.read_failures,
            self.stats.processor_failures,
            self.stats.reconnects,
            self.sink.len().unwrap_or(0)
        );
    }
}

fn connect(source: &mut dyn VideoSource, address: &SourceAddress) -> Result<(), PipelineError> {
    source.open(address)?;
    if !source.is_open() {
        return Err(PipelineError::SourceConnection(format!(
            "{} did not report open",
            address
        )));
    }
    Ok(())
}

type Outcome = (ProcessingType, Result<ProcessingResult>);

/// Invoke each processor once; the scope is the per-frame barrier.
fn dispatch(
    processors: &mut [Box<dyn FrameProcessor>],
    frame: &Frame,
    frame_id: u64,
    timestamp: f64,
) -> Vec<Outcome> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = processors
            .iter_mut()
            .map(|p| {
                let kind = p.kind();
                (kind, scope.spawn(move || p.process(frame, frame_id, timestamp)))
            })
            .collect();
        handles
            .into_iter()
            .map(|(kind, handle)| {
                let outcome = handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("processor panicked")));
                (kind, outcome)
            })
            .collect()
    })
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_signal_interrupts_sleep() {
        let stop = StopSignal::new();
        assert!(stop.sleep(Duration::from_millis(1)));
        stop.stop();
        let started = Instant::now();
        assert!(!stop.sleep(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn default_options_pace_at_thirty_fps() {
        let options = ExecutorOptions::default();
        assert_eq!(options.frame_period, Duration::from_nanos(33_333_333));
        assert_eq!(options.retry_delay, Duration::from_secs(1));
    }
}
