//! Pull-based frame source over a `MediaPipeline`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::frame::VideoFrame;
use crate::ingest::locator::Locator;
use crate::ingest::pipeline::{build_pipeline, ControlSignal, MediaPipeline, PipelineBackend};

pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceOptions {
    pub backend: PipelineBackend,
    /// How long `open()` waits for the pipeline to report readiness.
    pub open_timeout: Duration,
    /// Wait per pull attempt inside `read()`.
    pub pull_timeout: Duration,
    /// Consecutive empty pulls before `read()` gives up. `None` retries forever.
    pub max_idle_polls: Option<u32>,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            backend: PipelineBackend::default(),
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            pull_timeout: DEFAULT_PULL_TIMEOUT,
            max_idle_polls: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceState {
    Closed,
    Opening,
    Streaming,
    EndOfStream,
    Failed,
}

/// Why a source stopped producing frames.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum StreamEnd {
    EndOfStream,
    Error(String),
    /// `max_idle_polls` consecutive pulls returned nothing.
    TimedOut,
    /// `read()` called while the source was not streaming.
    NotStreaming,
    /// The interrupt flag was raised while `read()` was waiting.
    Interrupted,
}

impl std::fmt::Display for StreamEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamEnd::EndOfStream => write!(f, "end of stream"),
            StreamEnd::Error(msg) => write!(f, "stream error: {}", msg),
            StreamEnd::TimedOut => write!(f, "no frames within the idle limit"),
            StreamEnd::NotStreaming => write!(f, "source is not streaming"),
            StreamEnd::Interrupted => write!(f, "interrupted"),
        }
    }
}

#[derive(Debug)]
pub enum ReadOutcome {
    Frame(VideoFrame),
    Ended(StreamEnd),
}

impl ReadOutcome {
    pub fn into_frame(self) -> Option<VideoFrame> {
        match self {
            ReadOutcome::Frame(frame) => Some(frame),
            ReadOutcome::Ended(_) => None,
        }
    }
}

/// Frame source state machine:
/// `Closed -> Opening -> Streaming -> {EndOfStream | Failed} -> Closed`.
///
/// `read()` is the only blocking call. Control signals are drained with zero
/// wait before every pull, so an error or EOS posted while frames are still
/// queued ends the stream immediately.
pub struct FrameSource {
    locator: String,
    options: SourceOptions,
    state: SourceState,
    pipeline: Option<Box<dyn MediaPipeline>>,
    injected: Option<Box<dyn MediaPipeline>>,
    frames_read: u64,
    end: Option<StreamEnd>,
    interrupt: Option<Arc<AtomicBool>>,
}

impl FrameSource {
    pub fn new(locator: impl Into<String>, options: SourceOptions) -> Self {
        Self {
            locator: locator.into(),
            options,
            state: SourceState::Closed,
            pipeline: None,
            injected: None,
            frames_read: 0,
            end: None,
            interrupt: None,
        }
    }

    /// Use `pipeline` for the next `open()` instead of building one from the
    /// locator. Pipelines are single-use; a later reopen builds from the locator.
    pub fn with_pipeline(
        locator: impl Into<String>,
        options: SourceOptions,
        pipeline: Box<dyn MediaPipeline>,
    ) -> Self {
        let mut source = Self::new(locator, options);
        source.injected = Some(pipeline);
        source
    }

    /// Flag checked between pull attempts. Once set, a waiting `read()`
    /// returns `StreamEnd::Interrupted` within one `pull_timeout`.
    pub fn set_interrupt(&mut self, flag: Arc<AtomicBool>) {
        self.interrupt = Some(flag);
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn end_reason(&self) -> Option<&StreamEnd> {
        self.end.as_ref()
    }

    /// Build and start the pipeline, then wait up to `open_timeout` for it to
    /// become ready. On failure the pipeline is stopped and the state is
    /// `Failed` until `release()`.
    pub fn open(&mut self) -> Result<()> {
        if self.state != SourceState::Closed {
            return Err(anyhow!(
                "open() requires a closed source, current state is {:?}",
                self.state
            ));
        }
        self.state = SourceState::Opening;
        self.frames_read = 0;
        self.end = None;

        match self.start_pipeline() {
            Ok(()) => {
                self.state = SourceState::Streaming;
                Ok(())
            }
            Err(e) => {
                log::warn!("FrameSource: failed to open {}: {:#}", self.locator, e);
                self.stop_pipeline();
                self.state = SourceState::Failed;
                self.end = Some(StreamEnd::Error(format!("{:#}", e)));
                Err(e)
            }
        }
    }

    fn start_pipeline(&mut self) -> Result<()> {
        let pipeline = match self.injected.take() {
            Some(pipeline) => pipeline,
            None => {
                let locator = Locator::parse(&self.locator)?;
                build_pipeline(&locator, self.options.backend)
                    .with_context(|| format!("build pipeline for {}", locator))?
            }
        };
        let description = pipeline.describe();
        log::info!("FrameSource: opening {}", description);

        let pipeline = self.pipeline.insert(pipeline);
        pipeline
            .start()
            .with_context(|| format!("start {}", description))?;

        match pipeline.poll_control(self.options.open_timeout) {
            Some(ControlSignal::Ready) => {
                log::info!("FrameSource: streaming from {}", description);
            }
            Some(ControlSignal::EndOfStream) => {
                return Err(anyhow!("{} ended before it became ready", description));
            }
            Some(ControlSignal::Error(msg)) => {
                return Err(anyhow!("{} failed to start: {}", description, msg));
            }
            None => {
                // Live sources may still be prerolling.
                log::warn!(
                    "FrameSource: no readiness signal from {} within {:?}, reading anyway",
                    description,
                    self.options.open_timeout
                );
            }
        }
        Ok(())
    }

    /// Next frame, or why the stream ended.
    pub fn read(&mut self) -> ReadOutcome {
        if self.state != SourceState::Streaming {
            return ReadOutcome::Ended(self.end.clone().unwrap_or(StreamEnd::NotStreaming));
        }

        let pull_timeout = self.options.pull_timeout;
        let max_idle_polls = self.options.max_idle_polls;
        let mut idle_polls = 0u32;
        loop {
            let interrupted = self.interrupted();
            let Some(pipeline) = self.pipeline.as_deref_mut() else {
                return self.finish(StreamEnd::NotStreaming);
            };
            if let Some(end) = drain_control(pipeline) {
                return self.finish(end);
            }
            if interrupted {
                return self.finish(StreamEnd::Interrupted);
            }
            if max_idle_polls.is_some_and(|max| idle_polls >= max) {
                return self.finish(StreamEnd::TimedOut);
            }
            match pipeline.pull_frame(pull_timeout) {
                Ok(Some(frame)) => {
                    self.frames_read += 1;
                    return ReadOutcome::Frame(frame);
                }
                Ok(None) => {
                    idle_polls += 1;
                    log::debug!(
                        "FrameSource: no frame within {:?} (attempt {})",
                        pull_timeout,
                        idle_polls
                    );
                }
                Err(e) => return self.finish(StreamEnd::Error(format!("{:#}", e))),
            }
        }
    }

    fn finish(&mut self, end: StreamEnd) -> ReadOutcome {
        match &end {
            StreamEnd::EndOfStream => {
                log::info!(
                    "FrameSource: {} reached end of stream after {} frames",
                    self.locator,
                    self.frames_read
                );
                self.state = SourceState::EndOfStream;
            }
            StreamEnd::Interrupted => {
                log::info!(
                    "FrameSource: {} interrupted after {} frames",
                    self.locator,
                    self.frames_read
                );
                self.state = SourceState::EndOfStream;
            }
            other => {
                log::warn!("FrameSource: {} stopped: {}", self.locator, other);
                self.state = SourceState::Failed;
            }
        }
        self.end = Some(end.clone());
        ReadOutcome::Ended(end)
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn stop_pipeline(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.stop();
        }
    }

    /// Stop the pipeline and return to `Closed`. Safe in any state, any number of times.
    pub fn release(&mut self) {
        let had_pipeline = self.pipeline.is_some();
        self.stop_pipeline();
        self.injected = None;
        if had_pipeline {
            log::info!("FrameSource: released {}", self.locator);
        }
        self.state = SourceState::Closed;
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// First terminal signal waiting on the control channel, without blocking.
fn drain_control(pipeline: &mut dyn MediaPipeline) -> Option<StreamEnd> {
    while let Some(signal) = pipeline.poll_control(Duration::ZERO) {
        if !signal.is_terminal() {
            continue;
        }
        return Some(match signal {
            ControlSignal::Error(msg) => StreamEnd::Error(msg),
            _ => StreamEnd::EndOfStream,
        });
    }
    None
}
