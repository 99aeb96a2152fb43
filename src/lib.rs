//! frametrack
//!
//! Video ingest with per-frame detection and multi-object tracking.
//!
//! # Architecture
//!
//! Frames flow one at a time through a single thread:
//!
//! 1. **Ingest**: `FrameSource` drives a media pipeline (GStreamer, FFmpeg or a
//!    synthetic `stub://` source) as a pull iterator with explicit
//!    end-of-stream and error reporting.
//! 2. **Detect**: a `DetectorBackend` turns a frame into boxes, then a
//!    `DetectionFilter` applies the confidence floor and class allow-list.
//! 3. **Track**: a `Tracker` assigns stable identities, one output per input
//!    detection in input order.
//! 4. **Emit**: a `RecordSink` receives one `FrameRecord` per frame.
//!
//! # Module Structure
//!
//! - `bbox`: pixel boxes, IoU, normalisation
//! - `frame`: owned RGB24 frames
//! - `ingest`: locators, pipelines, the frame-source state machine
//! - `detect`: detector backends and filtering
//! - `track`: greedy IoU tracker and the re-identification adapter
//! - `emit`: frame records and sinks
//! - `orchestrator`: the frame loop
//! - `config` / `runner`: layered configuration and startup wiring
//! - `report`: summaries of emitted record streams

pub mod bbox;
pub mod config;
pub mod detect;
pub mod emit;
pub mod frame;
pub mod ingest;
pub mod orchestrator;
pub mod report;
pub mod runner;
pub mod track;

pub use bbox::{iou, BoundingBox, Centroid, ImageSize, NormalizedBox};
pub use config::FrametrackConfig;
pub use detect::{Detection, DetectionFilter, DetectorBackend, MotionBackend};
pub use emit::{FrameRecord, NdjsonSink, RecordContext, RecordSink, SourceInfo};
pub use frame::VideoFrame;
pub use ingest::{
    FrameSource, Locator, MediaPipeline, PipelineBackend, ReadOutcome, SourceOptions, SourceState,
    StreamEnd,
};
pub use orchestrator::{FrameOrchestrator, RunEnd, RunOptions, RunSummary};
pub use report::TrackReport;
pub use track::{IouTracker, IouTrackerConfig, ReidAdapter, TrackId, TrackedDetection, Tracker};
