//! Frame loop: read -> detect -> filter -> track -> emit.
//!
//! One thread, one frame at a time. The source is released and the sink is
//! closed on every exit path, including startup failures and sink errors.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::detect::{Detection, DetectionFilter, DetectorBackend};
use crate::emit::{FrameRecord, RecordContext, RecordSink};
use crate::frame::VideoFrame;
use crate::ingest::{FrameSource, ReadOutcome, StreamEnd};
use crate::track::{TrackId, TrackedDetection, Tracker};

pub const DEFAULT_FPS_LOG_INTERVAL: u64 = 30;

#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Stop after this many frames.
    pub max_frames: Option<u64>,
    /// Frames between throughput log lines.
    pub fps_log_interval: u64,
    /// Checked before every frame and while the source waits for one.
    pub stop: Option<Arc<AtomicBool>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_frames: None,
            fps_log_interval: DEFAULT_FPS_LOG_INTERVAL,
            stop: None,
        }
    }
}

/// Why a run ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RunEnd {
    /// `open()` failed; no frame was read.
    SourceUnavailable(String),
    StreamEnded(StreamEnd),
    Stopped,
    FrameLimit,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub frames: u64,
    pub detections: u64,
    pub unique_tracks: usize,
    pub end: RunEnd,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn source_available(&self) -> bool {
        !matches!(self.end, RunEnd::SourceUnavailable(_))
    }
}

#[derive(Default)]
struct RunStats {
    frames: u64,
    detections: u64,
    track_ids: HashSet<TrackId>,
}

pub struct FrameOrchestrator {
    source: FrameSource,
    detector: Option<Box<dyn DetectorBackend>>,
    filter: DetectionFilter,
    tracker: Option<Box<dyn Tracker>>,
    sink: Option<Box<dyn RecordSink>>,
    context: RecordContext,
    options: RunOptions,
}

impl FrameOrchestrator {
    pub fn new(source: FrameSource, context: RecordContext) -> Self {
        Self {
            source,
            detector: None,
            filter: DetectionFilter::allow_all(),
            tracker: None,
            sink: None,
            context,
            options: RunOptions::default(),
        }
    }

    pub fn with_detector(mut self, detector: Box<dyn DetectorBackend>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_filter(mut self, filter: DetectionFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_tracker(mut self, tracker: Box<dyn Tracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn source(&self) -> &FrameSource {
        &self.source
    }

    pub fn context(&self) -> &RecordContext {
        &self.context
    }

    /// Drive the source to completion.
    ///
    /// Returns `Err` only for detector warm-up and sink failures. A source that
    /// cannot be opened yields `RunEnd::SourceUnavailable`.
    pub fn run(&mut self) -> Result<RunSummary> {
        let started = Instant::now();
        let mut stats = RunStats::default();

        let end = self.run_inner(&mut stats);
        self.source.release();
        let closed = self.close_sink();
        let end = end?;
        closed?;

        let summary = RunSummary {
            run_id: self.context.pipeline_run_id.clone(),
            frames: stats.frames,
            detections: stats.detections,
            unique_tracks: stats.track_ids.len(),
            end,
            elapsed: started.elapsed(),
        };
        log::info!(
            "run {} finished: {:?} after {} frames, {} detections, {} unique tracks in {:.1}s",
            summary.run_id,
            summary.end,
            summary.frames,
            summary.detections,
            summary.unique_tracks,
            summary.elapsed.as_secs_f64()
        );
        Ok(summary)
    }

    fn run_inner(&mut self, stats: &mut RunStats) -> Result<RunEnd> {
        if let Some(detector) = self.detector.as_mut() {
            detector
                .warm_up()
                .with_context(|| format!("warm up {} detector", detector.name()))?;
        }
        if let Some(stop) = &self.options.stop {
            self.source.set_interrupt(stop.clone());
        }
        if let Err(e) = self.source.open() {
            return Ok(RunEnd::SourceUnavailable(format!("{:#}", e)));
        }
        log::info!(
            "run {} started: source={} detector={} tracker={} sink={}",
            self.context.pipeline_run_id,
            self.source.locator(),
            self.detector.as_ref().map_or("none", |d| d.name()),
            self.tracker.as_ref().map_or("none", |t| t.name()),
            self.sink.as_ref().map_or("none", |s| s.name()),
        );

        let streaming_since = Instant::now();
        loop {
            if self.stop_requested() {
                return Ok(RunEnd::Stopped);
            }
            if self.options.max_frames.is_some_and(|max| stats.frames >= max) {
                return Ok(RunEnd::FrameLimit);
            }
            let frame = match self.source.read() {
                ReadOutcome::Frame(frame) => frame,
                ReadOutcome::Ended(StreamEnd::Interrupted) => return Ok(RunEnd::Stopped),
                ReadOutcome::Ended(end) => return Ok(RunEnd::StreamEnded(end)),
            };
            stats.frames += 1;
            self.process_frame(stats, &frame)?;

            let interval = self.options.fps_log_interval.max(1);
            if stats.frames % interval == 0 {
                self.log_throughput(stats, &frame, streaming_since.elapsed());
            }
        }
    }

    fn process_frame(&mut self, stats: &mut RunStats, frame: &VideoFrame) -> Result<()> {
        let frame_index = stats.frames;
        let detections = self.detect(frame, frame_index);

        let tracked = match self.tracker.as_mut() {
            Some(tracker) => tracker.update_with_frame(frame, &detections),
            None => TrackedDetection::untracked(&detections),
        };
        stats.detections += detections.len() as u64;
        stats
            .track_ids
            .extend(tracked.iter().filter_map(|t| t.track_id));

        if let Some(sink) = self.sink.as_mut() {
            let record = FrameRecord::build(
                &self.context,
                frame_index,
                frame.captured_at(),
                frame.size(),
                &detections,
                Some(&tracked),
            );
            sink.emit(&record)
                .with_context(|| format!("emit frame {} to {}", frame_index, sink.name()))?;
        }
        Ok(())
    }

    /// Detector failures cost one frame's detections, not the run.
    fn detect(&mut self, frame: &VideoFrame, frame_index: u64) -> Vec<Detection> {
        let Some(detector) = self.detector.as_mut() else {
            return Vec::new();
        };
        match detector.detect(frame) {
            Ok(raw) => self.filter.apply(raw),
            Err(e) => {
                log::warn!(
                    "frame {}: {} detector failed: {:#}",
                    frame_index,
                    detector.name(),
                    e
                );
                Vec::new()
            }
        }
    }

    fn log_throughput(&self, stats: &RunStats, frame: &VideoFrame, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let fps = if secs > 0.0 {
            stats.frames as f64 / secs
        } else {
            0.0
        };
        log::info!(
            "frames={} size={}x{} fps={:.1} detections={} active_tracks={}",
            stats.frames,
            frame.width,
            frame.height,
            fps,
            stats.detections,
            self.tracker.as_ref().map_or(0, |t| t.active_tracks())
        );
    }

    fn stop_requested(&self) -> bool {
        self.options
            .stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn close_sink(&mut self) -> Result<()> {
        if let Some(sink) = self.sink.as_mut() {
            sink.close()
                .with_context(|| format!("close {} sink", sink.name()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BoundingBox;
    use crate::emit::{MemorySink, SourceInfo};
    use crate::ingest::{ControlSignal, MediaPipeline, SourceOptions};
    use crate::track::{IouTracker, IouTrackerConfig};
    use anyhow::anyhow;

    fn context() -> RecordContext {
        RecordContext::new(
            SourceInfo {
                store_id: "store_01".into(),
                camera_id: "cam_01".into(),
                stream_id: "stream_01".into(),
            },
            Some("test-run".into()),
        )
    }

    fn source(locator: &str) -> FrameSource {
        FrameSource::new(locator, SourceOptions::default())
    }

    /// Same box every frame; fails on the frames listed in `fail_on`.
    struct FixedDetector {
        calls: u64,
        fail_on: Vec<u64>,
    }

    impl DetectorBackend for FixedDetector {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&mut self, _frame: &VideoFrame) -> Result<Vec<Detection>> {
            self.calls += 1;
            if self.fail_on.contains(&self.calls) {
                return Err(anyhow!("inference failed"));
            }
            Ok(vec![
                Detection::new(BoundingBox::new(2, 2, 10, 10), 0.9, 0, "person"),
                Detection::new(BoundingBox::new(20, 2, 28, 10), 0.1, 0, "person"),
            ])
        }
    }

    struct FailingSink {
        closed: Arc<AtomicBool>,
    }

    impl RecordSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn emit(&mut self, _record: &FrameRecord) -> Result<()> {
            Err(anyhow!("disk full"))
        }

        fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn runs_until_end_of_stream() -> Result<()> {
        let sink = MemorySink::new();
        let mut orchestrator = FrameOrchestrator::new(source("stub://cam?frames=4&width=32&height=32"), context())
            .with_detector(Box::new(FixedDetector {
                calls: 0,
                fail_on: vec![],
            }))
            .with_filter(DetectionFilter::new(0.5, Vec::<String>::new()))
            .with_tracker(Box::new(IouTracker::new(IouTrackerConfig::default())?))
            .with_sink(Box::new(sink.clone()));

        let summary = orchestrator.run()?;
        assert_eq!(summary.end, RunEnd::StreamEnded(StreamEnd::EndOfStream));
        assert_eq!(summary.frames, 4);
        assert_eq!(summary.detections, 4);
        assert_eq!(summary.unique_tracks, 1);

        let records = sink.records();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].frame_index, 1);
        assert_eq!(records[3].frame_index, 4);
        assert!(records
            .iter()
            .all(|r| r.detections.len() == 1 && r.detections[0].track_id == Some(TrackId(1))));
        assert!(sink.is_closed());
        assert_eq!(orchestrator.source().state(), crate::ingest::SourceState::Closed);
        Ok(())
    }

    #[test]
    fn detector_failure_yields_empty_frame() -> Result<()> {
        let sink = MemorySink::new();
        let mut orchestrator = FrameOrchestrator::new(source("stub://cam?frames=3&width=32&height=32"), context())
            .with_detector(Box::new(FixedDetector {
                calls: 0,
                fail_on: vec![2],
            }))
            .with_sink(Box::new(sink.clone()));

        let summary = orchestrator.run()?;
        assert_eq!(summary.frames, 3);
        let counts: Vec<usize> = sink.records().iter().map(|r| r.detections.len()).collect();
        assert_eq!(counts, vec![2, 0, 2]);
        // No tracker: identities are null.
        assert!(sink.records()[0].detections.iter().all(|d| d.track_id.is_none()));
        Ok(())
    }

    #[test]
    fn missing_source_is_reported_not_raised() -> Result<()> {
        let sink = MemorySink::new();
        let mut orchestrator = FrameOrchestrator::new(source("/no/such/video.mp4"), context())
            .with_sink(Box::new(sink.clone()));
        let summary = orchestrator.run()?;
        assert!(matches!(summary.end, RunEnd::SourceUnavailable(_)));
        assert!(!summary.source_available());
        assert_eq!(summary.frames, 0);
        assert!(sink.is_closed());
        Ok(())
    }

    #[test]
    fn frame_limit_and_stop_flag() -> Result<()> {
        let mut limited = FrameOrchestrator::new(source("stub://cam?width=16&height=16"), context())
            .with_options(RunOptions {
                max_frames: Some(5),
                ..RunOptions::default()
            });
        let summary = limited.run()?;
        assert_eq!(summary.end, RunEnd::FrameLimit);
        assert_eq!(summary.frames, 5);

        let stop = Arc::new(AtomicBool::new(true));
        let mut stopped = FrameOrchestrator::new(source("stub://cam?width=16&height=16"), context())
            .with_options(RunOptions {
                stop: Some(stop),
                ..RunOptions::default()
            });
        let summary = stopped.run()?;
        assert_eq!(summary.end, RunEnd::Stopped);
        assert_eq!(summary.frames, 0);
        Ok(())
    }

    #[test]
    fn sink_failure_releases_and_errors() {
        let closed = Arc::new(AtomicBool::new(false));
        let mut orchestrator = FrameOrchestrator::new(source("stub://cam?frames=3&width=16&height=16"), context())
            .with_sink(Box::new(FailingSink {
                closed: closed.clone(),
            }));
        let err = orchestrator.run().unwrap_err();
        assert!(format!("{:#}", err).contains("disk full"));
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(orchestrator.source().state(), crate::ingest::SourceState::Closed);
    }

    /// A live source that connected and then went quiet.
    struct SilentPipeline {
        ready: bool,
    }

    impl MediaPipeline for SilentPipeline {
        fn describe(&self) -> String {
            "silent".to_string()
        }

        fn start(&mut self) -> Result<()> {
            self.ready = true;
            Ok(())
        }

        fn poll_control(&mut self, _timeout: Duration) -> Option<ControlSignal> {
            std::mem::take(&mut self.ready).then_some(ControlSignal::Ready)
        }

        fn pull_frame(&mut self, timeout: Duration) -> Result<Option<VideoFrame>> {
            std::thread::sleep(timeout);
            Ok(None)
        }

        fn stop(&mut self) {}
    }

    #[test]
    fn stop_flag_interrupts_a_stalled_source() -> Result<()> {
        let options = SourceOptions {
            pull_timeout: Duration::from_millis(10),
            ..SourceOptions::default()
        };
        let source = FrameSource::with_pipeline(
            "rtsp://cam/stalled",
            options,
            Box::new(SilentPipeline { ready: false }),
        );
        let stop = Arc::new(AtomicBool::new(false));
        let mut orchestrator = FrameOrchestrator::new(source, context()).with_options(RunOptions {
            stop: Some(stop.clone()),
            ..RunOptions::default()
        });

        let setter = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            stop.store(true, Ordering::SeqCst);
        });
        let started = Instant::now();
        let summary = orchestrator.run()?;
        setter.join().map_err(|_| anyhow!("flag setter panicked"))?;

        assert_eq!(summary.end, RunEnd::Stopped);
        assert_eq!(summary.frames, 0);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(orchestrator.source().state(), crate::ingest::SourceState::Closed);
        Ok(())
    }

    #[test]
    fn stream_error_ends_run() -> Result<()> {
        let mut orchestrator =
            FrameOrchestrator::new(source("stub://cam?error_after=2&width=16&height=16"), context());
        let summary = orchestrator.run()?;
        assert_eq!(summary.frames, 2);
        assert!(matches!(summary.end, RunEnd::StreamEnded(StreamEnd::Error(_))));
        Ok(())
    }
}
