//! Frame ingestion.
//!
//! A locator (file path, `rtsp://` URL or `stub://` synthetic source) is turned
//! into a `MediaPipeline`, and `FrameSource` drives that pipeline as a
//! pull-based iterator:
//! - `open()` builds and starts the pipeline and waits for readiness
//! - `read()` drains control signals, then pulls one RGB24 frame
//! - `release()` tears the pipeline down, from any state
//!
//! Decoder backends are feature-gated:
//! - GStreamer (feature: ingest-gstreamer)
//! - FFmpeg (feature: ingest-ffmpeg)
//!
//! The synthetic pipeline is always available.

#[cfg(feature = "ingest-ffmpeg")]
mod ffmpeg;
#[cfg(feature = "ingest-gstreamer")]
mod gst;
#[cfg_attr(not(feature = "ingest-ffmpeg"), allow(dead_code))]
mod handoff;
mod locator;
mod pipeline;
mod source;
mod synthetic;

#[cfg(feature = "ingest-ffmpeg")]
pub use ffmpeg::FfmpegPipeline;
#[cfg(feature = "ingest-gstreamer")]
pub use gst::GstPipeline;
pub use locator::{Locator, STUB_SCHEME};
pub use pipeline::{build_pipeline, ControlSignal, MediaPipeline, PipelineBackend};
pub use source::{
    FrameSource, ReadOutcome, SourceOptions, SourceState, StreamEnd, DEFAULT_OPEN_TIMEOUT,
    DEFAULT_PULL_TIMEOUT,
};
pub use synthetic::{SyntheticConfig, SyntheticPipeline};
