use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::frame::VideoFrame;
use crate::ingest::locator::Locator;
use crate::ingest::synthetic::SyntheticPipeline;

/// Control-plane notification from a running pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlSignal {
    /// The pipeline has prerolled and will deliver frames.
    Ready,
    EndOfStream,
    Error(String),
}

impl ControlSignal {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ControlSignal::Ready)
    }
}

/// A decode graph seen from the outside: one data channel and one control
/// channel.
///
/// Implementations keep at most one undelivered frame and drop older frames
/// rather than stalling upstream decode.
pub trait MediaPipeline {
    /// Human-readable description for logs.
    fn describe(&self) -> String;

    /// Start decoding. Readiness, errors and EOS are reported on the control channel.
    fn start(&mut self) -> Result<()>;

    /// Next control signal, waiting at most `timeout` (zero = non-blocking).
    fn poll_control(&mut self, timeout: Duration) -> Option<ControlSignal>;

    /// Next decoded frame, waiting at most `timeout`. `Ok(None)` means nothing
    /// arrived in time; terminal conditions surface on the control channel.
    fn pull_frame(&mut self, timeout: Duration) -> Result<Option<VideoFrame>>;

    /// Tear the graph down. Must tolerate repeated calls.
    fn stop(&mut self);
}

/// Decoder framework used for file and network locators.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineBackend {
    #[default]
    Gstreamer,
    Ffmpeg,
}

impl FromStr for PipelineBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gstreamer" | "gst" => Ok(Self::Gstreamer),
            "ffmpeg" => Ok(Self::Ffmpeg),
            other => Err(anyhow!(
                "unknown pipeline backend '{}' (expected gstreamer or ffmpeg)",
                other
            )),
        }
    }
}

/// Build (but do not start) the pipeline for `locator`.
///
/// Missing files are rejected here, before any decoder is touched.
pub fn build_pipeline(locator: &Locator, backend: PipelineBackend) -> Result<Box<dyn MediaPipeline>> {
    match locator {
        Locator::Synthetic(config) => Ok(Box::new(SyntheticPipeline::new(config.clone()))),
        Locator::File(path) => {
            if !path.is_file() {
                return Err(anyhow!("source file {} does not exist", path.display()));
            }
            build_decoder(locator, backend)
        }
        Locator::Stream(_) => build_decoder(locator, backend),
    }
}

#[allow(unused_variables)]
fn build_decoder(locator: &Locator, backend: PipelineBackend) -> Result<Box<dyn MediaPipeline>> {
    match backend {
        PipelineBackend::Gstreamer => {
            #[cfg(feature = "ingest-gstreamer")]
            {
                Ok(Box::new(super::gst::GstPipeline::new(locator)?))
            }
            #[cfg(not(feature = "ingest-gstreamer"))]
            {
                Err(anyhow!(
                    "decoding {} requires the ingest-gstreamer feature",
                    locator
                ))
            }
        }
        PipelineBackend::Ffmpeg => {
            #[cfg(feature = "ingest-ffmpeg")]
            {
                Ok(Box::new(super::ffmpeg::FfmpegPipeline::new(locator)?))
            }
            #[cfg(not(feature = "ingest-ffmpeg"))]
            {
                Err(anyhow!(
                    "decoding {} requires the ingest-ffmpeg feature",
                    locator
                ))
            }
        }
    }
}
