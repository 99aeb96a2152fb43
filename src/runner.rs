//! Assembles a `FrameOrchestrator` from a validated `FrametrackConfig`.
//!
//! Collaborators are chosen here, once, at startup. A model that cannot be
//! loaded or a sink that cannot be opened fails the build, before any frame
//! is read.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::config::{DetectorKind, DetectorSettings, EmitSettings, EmitTarget, FrametrackConfig};
use crate::detect::{DetectionFilter, DetectorBackend, MotionBackend};
use crate::emit::{NdjsonSink, RecordContext, RecordSink, SourceInfo};
use crate::ingest::FrameSource;
use crate::orchestrator::{FrameOrchestrator, RunOptions};
use crate::track::{IouTracker, Tracker};

pub fn build_orchestrator(
    cfg: &FrametrackConfig,
    max_frames: Option<u64>,
    stop: Option<Arc<AtomicBool>>,
) -> Result<FrameOrchestrator> {
    let mut context = RecordContext::new(
        SourceInfo {
            store_id: cfg.ids.store_id.clone(),
            camera_id: cfg.ids.camera_id.clone(),
            stream_id: cfg.ids.stream_id.clone(),
        },
        cfg.ids.run_id.clone(),
    );
    context.schema_version = cfg.emit.schema_version.clone();

    let source = FrameSource::new(cfg.source.locator.clone(), cfg.source.options());
    let mut orchestrator = FrameOrchestrator::new(source, context)
        .with_filter(DetectionFilter::new(
            cfg.detector.confidence,
            &cfg.detector.classes,
        ))
        .with_options(RunOptions {
            max_frames,
            fps_log_interval: cfg.fps_log_interval,
            stop,
        });

    if let Some(detector) = build_detector(&cfg.detector)? {
        orchestrator = orchestrator.with_detector(detector);
    }
    if let Some(tracker) = build_tracker(cfg)? {
        orchestrator = orchestrator.with_tracker(tracker);
    }
    if let Some(sink) = build_sink(&cfg.emit)? {
        orchestrator = orchestrator.with_sink(sink);
    }
    Ok(orchestrator)
}

pub fn build_detector(settings: &DetectorSettings) -> Result<Option<Box<dyn DetectorBackend>>> {
    match settings.kind {
        DetectorKind::None => Ok(None),
        DetectorKind::Motion => Ok(Some(Box::new(MotionBackend::new()))),
        DetectorKind::Yolo => build_yolo(settings).map(Some),
    }
}

#[cfg(feature = "backend-tract")]
fn build_yolo(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    use anyhow::Context;

    let model = settings
        .model
        .as_ref()
        .ok_or_else(|| anyhow!("the yolo detector requires a model path"))?;
    let mut backend = crate::detect::YoloBackend::new(model, settings.input_size)
        .with_context(|| format!("load YOLO model {}", model.display()))?
        .with_threshold(settings.confidence)
        .with_nms_iou(settings.nms_iou);
    if let Some(labels) = &settings.labels {
        backend = backend.with_labels_file(labels)?;
    }
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn build_yolo(_settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!("the yolo detector requires the backend-tract feature"))
}

pub fn build_tracker(cfg: &FrametrackConfig) -> Result<Option<Box<dyn Tracker>>> {
    if !cfg.tracking.enabled {
        return Ok(None);
    }
    let tracker = IouTracker::new(cfg.tracking.tracker_config())?;
    Ok(Some(Box::new(tracker)))
}

pub fn build_sink(settings: &EmitSettings) -> Result<Option<Box<dyn RecordSink>>> {
    match settings.target {
        EmitTarget::None => Ok(None),
        EmitTarget::Ndjson => Ok(Some(Box::new(NdjsonSink::open(&settings.out)?))),
        EmitTarget::Mqtt => build_mqtt(settings).map(Some),
    }
}

#[cfg(feature = "sink-mqtt")]
fn build_mqtt(settings: &EmitSettings) -> Result<Box<dyn RecordSink>> {
    let sink = crate::emit::MqttSink::connect(crate::emit::MqttSinkConfig {
        host: settings.mqtt.host.clone(),
        port: settings.mqtt.port,
        client_id: settings.mqtt.client_id.clone(),
        topic_prefix: settings.mqtt.topic_prefix.clone(),
    })?;
    Ok(Box::new(sink))
}

#[cfg(not(feature = "sink-mqtt"))]
fn build_mqtt(_settings: &EmitSettings) -> Result<Box<dyn RecordSink>> {
    Err(anyhow!("MQTT emission requires the sink-mqtt feature"))
}
