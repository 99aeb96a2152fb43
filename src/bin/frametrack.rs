//! frametrack - ingest a video source, detect, track and emit per-frame records
//!
//! Settings are layered: config file (`--config` / FRAMETRACK_CONFIG), then
//! FRAMETRACK_* environment variables, then the flags below.
//!
//! Exit status 2 means the source could not be opened.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use frametrack::config::{split_csv, FrametrackConfig};
use frametrack::runner::build_orchestrator;
use frametrack::RunEnd;

const EXIT_SOURCE_UNAVAILABLE: i32 = 2;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (.toml, otherwise JSON).
    #[arg(long, env = "FRAMETRACK_CONFIG")]
    config: Option<PathBuf>,
    /// File path, rtsp:// URL or stub:// synthetic source.
    #[arg(long)]
    src: Option<String>,
    /// Decoder backend (gstreamer|ffmpeg).
    #[arg(long, value_name = "BACKEND")]
    backend: Option<String>,
    /// Detector (none|motion|yolo).
    #[arg(long, value_name = "KIND")]
    detector: Option<String>,
    /// ONNX model for the yolo detector.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Class names file, one per line.
    #[arg(long)]
    labels: Option<PathBuf>,
    /// Minimum detection confidence.
    #[arg(long)]
    conf: Option<f32>,
    /// Class allow-list, e.g. "person,bag".
    #[arg(long)]
    classes: Option<String>,
    /// Enable the IoU tracker.
    #[arg(long)]
    track: bool,
    /// IoU threshold for continuing a track.
    #[arg(long)]
    iou: Option<f32>,
    /// Frames a track survives without a match.
    #[arg(long)]
    ttl: Option<u32>,
    /// Record emission (none|ndjson|mqtt).
    #[arg(long, value_name = "TARGET")]
    emit: Option<String>,
    /// NDJSON output path ("-" = stdout).
    #[arg(long)]
    out: Option<String>,
    #[arg(long)]
    store_id: Option<String>,
    #[arg(long)]
    camera_id: Option<String>,
    #[arg(long)]
    stream_id: Option<String>,
    /// Pipeline run id (random when omitted).
    #[arg(long)]
    run_id: Option<String>,
    /// Frames between throughput log lines.
    #[arg(long)]
    fps_log: Option<u64>,
    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
}

impl Args {
    fn apply(&self, cfg: &mut FrametrackConfig) -> Result<()> {
        if let Some(src) = &self.src {
            cfg.source.locator = src.clone();
        }
        if let Some(backend) = &self.backend {
            cfg.source.backend = backend.parse()?;
        }
        if let Some(detector) = &self.detector {
            cfg.detector.kind = detector.parse()?;
        }
        if let Some(model) = &self.model {
            cfg.detector.model = Some(model.clone());
        }
        if let Some(labels) = &self.labels {
            cfg.detector.labels = Some(labels.clone());
        }
        if let Some(conf) = self.conf {
            cfg.detector.confidence = conf;
        }
        if let Some(classes) = &self.classes {
            cfg.detector.classes = split_csv(classes);
        }
        if self.track {
            cfg.tracking.enabled = true;
        }
        if let Some(iou) = self.iou {
            cfg.tracking.iou_threshold = iou;
        }
        if let Some(ttl) = self.ttl {
            cfg.tracking.max_ttl = ttl;
        }
        if let Some(emit) = &self.emit {
            cfg.emit.target = emit.parse()?;
        }
        if let Some(out) = &self.out {
            cfg.emit.out = out.clone();
        }
        if let Some(store_id) = &self.store_id {
            cfg.ids.store_id = store_id.clone();
        }
        if let Some(camera_id) = &self.camera_id {
            cfg.ids.camera_id = camera_id.clone();
        }
        if let Some(stream_id) = &self.stream_id {
            cfg.ids.stream_id = stream_id.clone();
        }
        if let Some(run_id) = &self.run_id {
            cfg.ids.run_id = Some(run_id.clone()).filter(|id| !id.trim().is_empty());
        }
        if let Some(fps_log) = self.fps_log {
            cfg.fps_log_interval = fps_log;
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = FrametrackConfig::load_layers_from(args.config.as_deref())?;
    args.apply(&mut cfg)?;
    cfg.validate()?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })
        .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;
    }

    let mut orchestrator = build_orchestrator(&cfg, args.max_frames, Some(stop))?;
    log::info!(
        "frametrack {} run_id={} src={}",
        env!("CARGO_PKG_VERSION"),
        orchestrator.context().pipeline_run_id,
        cfg.source.locator
    );
    let summary = orchestrator.run()?;

    match &summary.end {
        RunEnd::SourceUnavailable(reason) => {
            log::error!("cannot open source {}: {}", cfg.source.locator, reason);
            std::process::exit(EXIT_SOURCE_UNAVAILABLE);
        }
        RunEnd::Stopped => log::info!("stopped by signal"),
        RunEnd::FrameLimit => log::info!("frame limit reached"),
        RunEnd::StreamEnded(end) => log::info!("source finished: {}", end),
    }
    Ok(())
}
