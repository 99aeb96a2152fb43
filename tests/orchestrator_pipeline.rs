use std::io::BufReader;

use frametrack::emit::MemorySink;
use frametrack::ingest::SourceOptions;
use frametrack::{
    DetectionFilter, FrameOrchestrator, FrameSource, IouTracker, IouTrackerConfig, MotionBackend,
    NdjsonSink, RecordContext, RunEnd, SourceInfo, SourceState, StreamEnd, TrackId, TrackReport,
};

fn context() -> RecordContext {
    RecordContext::new(
        SourceInfo {
            store_id: "store_01".into(),
            camera_id: "cam_01".into(),
            stream_id: "stream_01".into(),
        },
        Some("it-run".into()),
    )
}

#[test]
fn moving_square_keeps_one_identity() -> anyhow::Result<()> {
    let sink = MemorySink::new();
    let source = FrameSource::new(
        "stub://cam?frames=10&width=160&height=120",
        SourceOptions::default(),
    );
    let mut orchestrator = FrameOrchestrator::new(source, context())
        .with_detector(Box::new(MotionBackend::new()))
        .with_filter(DetectionFilter::new(0.0, Vec::<String>::new()))
        .with_tracker(Box::new(IouTracker::new(IouTrackerConfig::default())?))
        .with_sink(Box::new(sink.clone()));

    let summary = orchestrator.run()?;
    assert_eq!(summary.end, RunEnd::StreamEnded(StreamEnd::EndOfStream));
    assert_eq!(summary.frames, 10);
    assert_eq!(summary.unique_tracks, 1);

    let records = sink.records();
    assert_eq!(records.len(), 10);
    assert!(records[0].detections.is_empty());
    for record in &records[1..] {
        assert_eq!(record.detections.len(), 1, "frame {}", record.frame_index);
        let det = &record.detections[0];
        assert_eq!(det.class_name, "motion");
        assert_eq!(det.track_id, Some(TrackId(1)));
        assert_eq!(det.det_id, format!("{}-0", record.frame_index));
    }
    let indices: Vec<u64> = records.iter().map(|r| r.frame_index).collect();
    assert_eq!(indices, (1..=10).collect::<Vec<_>>());
    assert!(records.iter().all(|r| r.pipeline_run_id == "it-run"));
    assert!(sink.is_closed());
    Ok(())
}

#[test]
fn missing_file_reports_source_unavailable() -> anyhow::Result<()> {
    let sink = MemorySink::new();
    let source = FrameSource::new("/definitely/missing/clip.mp4", SourceOptions::default());
    let mut orchestrator = FrameOrchestrator::new(source, context()).with_sink(Box::new(sink.clone()));

    let summary = orchestrator.run()?;
    match &summary.end {
        RunEnd::SourceUnavailable(reason) => assert!(reason.contains("does not exist")),
        other => panic!("expected SourceUnavailable, got {:?}", other),
    }
    assert!(sink.records().is_empty());
    assert!(sink.is_closed());
    assert_eq!(orchestrator.source().state(), SourceState::Closed);
    Ok(())
}

#[test]
fn failed_open_can_be_released_twice() {
    let mut source = FrameSource::new("/definitely/missing/clip.mp4", SourceOptions::default());
    assert!(source.open().is_err());
    assert_eq!(source.state(), SourceState::Failed);
    source.release();
    source.release();
    assert_eq!(source.state(), SourceState::Closed);
}

#[test]
fn ndjson_output_feeds_the_report() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("records.ndjson");
    let sink = NdjsonSink::open(&path.to_string_lossy())?;

    let source = FrameSource::new(
        "stub://cam?frames=6&width=160&height=120",
        SourceOptions::default(),
    );
    let mut orchestrator = FrameOrchestrator::new(source, context())
        .with_detector(Box::new(MotionBackend::new()))
        .with_tracker(Box::new(IouTracker::new(IouTrackerConfig::default())?))
        .with_sink(Box::new(sink));
    orchestrator.run()?;

    let report = TrackReport::from_reader(BufReader::new(std::fs::File::open(&path)?))?;
    assert_eq!(report.frames, 6);
    assert_eq!(report.detections, 5);
    assert_eq!(report.untracked_detections, 0);
    assert_eq!(report.unique_tracks.len(), 1);
    assert_eq!(report.classes["motion"].detections, 5);
    Ok(())
}

#[test]
fn injected_stream_error_ends_the_run() -> anyhow::Result<()> {
    let sink = MemorySink::new();
    let source = FrameSource::new(
        "stub://cam?error_after=3&width=64&height=48",
        SourceOptions::default(),
    );
    let mut orchestrator = FrameOrchestrator::new(source, context()).with_sink(Box::new(sink.clone()));
    let summary = orchestrator.run()?;
    assert_eq!(summary.frames, 3);
    assert!(matches!(summary.end, RunEnd::StreamEnded(StreamEnd::Error(_))));
    assert_eq!(sink.records().len(), 3);
    Ok(())
}
