//! camfeed: streaming pipeline engine for camera event feeds
//!
//! A pipeline reads frames from a video source, runs them through an ordered
//! chain of frame processors, and publishes one event per frame (with a
//! thumbnail) into a bounded history served as an RSS feed over HTTP.
//!
//! # Flow
//!
//! `definition::load` -> `PipelineDefinition` -> `PipelineExecutor`
//! (`VideoSource` frames, processors built by `ProcessorRegistry`) ->
//! `EventSink` (thumbnail, history, feed) -> `api` HTTP server.
//!
//! # Module Structure
//!
//! - `definition`: YAML pipeline documents and URI validation
//! - `processor`: `FrameProcessor` contract, registry, built-in processors
//! - `ingest`: frame sources (synthetic, RTSP)
//! - `executor`: per-pipeline state machine, pacing, frame metrics
//! - `sink`: recent-history buffer, thumbnails, RSS rendering
//! - `api`: HTTP feed server
//! - `config`: daemon runtime settings

pub mod api;
pub mod config;
pub mod definition;
pub mod error;
pub mod executor;
pub mod frame;
pub mod ingest;
pub mod processor;
pub mod sink;

pub use definition::{
    load, load_file, validate_uri, Credentials, Params, PipelineDefinition, ProcessingNode,
    ProcessingStep, ProcessingType, StreamOutput, StreamSource,
};
pub use error::PipelineError;
pub use executor::{ExecutorOptions, ExecutorState, ExecutorStats, PipelineExecutor, StopSignal};
pub use frame::{Frame, FrameDimensions};
pub use ingest::{open_source, SourceAddress, SyntheticSource, VideoSource};
pub use processor::{
    BoundingBox, Detection, FrameProcessor, ProcessingResult, ProcessorRegistry,
    ProcessorSettings,
};
pub use sink::{EventSink, FeedSettings, FrameEvent};
