use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::ingest::{PipelineBackend, SourceOptions};
use crate::track::IouTrackerConfig;

const DEFAULT_OPEN_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_PULL_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_STORE_ID: &str = "store_01";
const DEFAULT_CAMERA_ID: &str = "cam_01";
const DEFAULT_STREAM_ID: &str = "stream_01";
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_NMS_IOU: f32 = 0.45;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_TRACK_IOU: f32 = 0.3;
const DEFAULT_TRACK_TTL: u32 = 30;
const DEFAULT_OUT: &str = "-";
const DEFAULT_SCHEMA_VERSION: &str = "1.0";
const DEFAULT_MQTT_HOST: &str = "127.0.0.1";
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTT_PREFIX: &str = "frametrack";
const DEFAULT_MQTT_CLIENT_ID: &str = "frametrack";
const DEFAULT_FPS_LOG_INTERVAL: u64 = 30;

#[derive(Debug, Deserialize, Default)]
struct FrametrackConfigFile {
    source: Option<SourceConfigFile>,
    ids: Option<IdsConfigFile>,
    detector: Option<DetectorConfigFile>,
    tracking: Option<TrackingConfigFile>,
    emit: Option<EmitConfigFile>,
    fps_log_interval: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    locator: Option<String>,
    backend: Option<PipelineBackend>,
    open_timeout_ms: Option<u64>,
    pull_timeout_ms: Option<u64>,
    max_idle_polls: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct IdsConfigFile {
    store_id: Option<String>,
    camera_id: Option<String>,
    stream_id: Option<String>,
    run_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    kind: Option<DetectorKind>,
    model: Option<PathBuf>,
    labels: Option<PathBuf>,
    confidence: Option<f32>,
    nms_iou: Option<f32>,
    input_size: Option<u32>,
    classes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    enabled: Option<bool>,
    iou_threshold: Option<f32>,
    max_ttl: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct EmitConfigFile {
    target: Option<EmitTarget>,
    out: Option<String>,
    schema_version: Option<String>,
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    host: Option<String>,
    port: Option<u16>,
    topic_prefix: Option<String>,
    client_id: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    #[default]
    None,
    Motion,
    Yolo,
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "motion" => Ok(Self::Motion),
            "yolo" => Ok(Self::Yolo),
            other => Err(anyhow!(
                "unknown detector '{}' (expected none, motion or yolo)",
                other
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmitTarget {
    #[default]
    None,
    #[serde(alias = "detection")]
    Ndjson,
    Mqtt,
}

impl FromStr for EmitTarget {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "ndjson" | "detection" => Ok(Self::Ndjson),
            "mqtt" => Ok(Self::Mqtt),
            other => Err(anyhow!(
                "unknown emit target '{}' (expected none, ndjson or mqtt)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrametrackConfig {
    pub source: SourceSettings,
    pub ids: IdSettings,
    pub detector: DetectorSettings,
    pub tracking: TrackingSettings,
    pub emit: EmitSettings,
    pub fps_log_interval: u64,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub locator: String,
    pub backend: PipelineBackend,
    pub open_timeout: Duration,
    pub pull_timeout: Duration,
    pub max_idle_polls: Option<u32>,
}

impl SourceSettings {
    pub fn options(&self) -> SourceOptions {
        SourceOptions {
            backend: self.backend,
            open_timeout: self.open_timeout,
            pull_timeout: self.pull_timeout,
            max_idle_polls: self.max_idle_polls,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdSettings {
    pub store_id: String,
    pub camera_id: String,
    pub stream_id: String,
    /// Generated per run when absent.
    pub run_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub kind: DetectorKind,
    pub model: Option<PathBuf>,
    pub labels: Option<PathBuf>,
    pub confidence: f32,
    pub nms_iou: f32,
    pub input_size: u32,
    /// Lower-cased allow-list; empty admits every class.
    pub classes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TrackingSettings {
    pub enabled: bool,
    pub iou_threshold: f32,
    pub max_ttl: u32,
}

impl TrackingSettings {
    pub fn tracker_config(&self) -> IouTrackerConfig {
        IouTrackerConfig {
            iou_threshold: self.iou_threshold,
            max_ttl: self.max_ttl,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmitSettings {
    pub target: EmitTarget,
    /// `"-"` is stdout.
    pub out: String,
    pub schema_version: String,
    pub mqtt: MqttSettings,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub topic_prefix: String,
    pub client_id: String,
}

impl FrametrackConfig {
    /// File, then environment, then validation.
    pub fn load() -> Result<Self> {
        let mut cfg = Self::load_layers()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// File and environment layers without validation, for callers that
    /// apply further overrides (CLI flags) before calling `validate`.
    pub fn load_layers() -> Result<Self> {
        let config_path = env_string("FRAMETRACK_CONFIG").map(PathBuf::from);
        Self::load_layers_from(config_path.as_deref())
    }

    /// Like `load_layers`, with the config file path given explicitly.
    pub fn load_layers_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn from_file(file: FrametrackConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        let ids = file.ids.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let tracking = file.tracking.unwrap_or_default();
        let emit = file.emit.unwrap_or_default();
        let mqtt = emit.mqtt.unwrap_or_default();

        Self {
            source: SourceSettings {
                locator: source.locator.unwrap_or_default(),
                backend: source.backend.unwrap_or_default(),
                open_timeout: Duration::from_millis(
                    source.open_timeout_ms.unwrap_or(DEFAULT_OPEN_TIMEOUT_MS),
                ),
                pull_timeout: Duration::from_millis(
                    source.pull_timeout_ms.unwrap_or(DEFAULT_PULL_TIMEOUT_MS),
                ),
                max_idle_polls: source.max_idle_polls,
            },
            ids: IdSettings {
                store_id: ids.store_id.unwrap_or_else(|| DEFAULT_STORE_ID.to_string()),
                camera_id: ids.camera_id.unwrap_or_else(|| DEFAULT_CAMERA_ID.to_string()),
                stream_id: ids.stream_id.unwrap_or_else(|| DEFAULT_STREAM_ID.to_string()),
                run_id: ids.run_id.filter(|id| !id.trim().is_empty()),
            },
            detector: DetectorSettings {
                kind: detector.kind.unwrap_or_default(),
                model: detector.model,
                labels: detector.labels,
                confidence: detector.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                nms_iou: detector.nms_iou.unwrap_or(DEFAULT_NMS_IOU),
                input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                classes: normalize_classes(detector.classes.unwrap_or_default()),
            },
            tracking: TrackingSettings {
                enabled: tracking.enabled.unwrap_or(false),
                iou_threshold: tracking.iou_threshold.unwrap_or(DEFAULT_TRACK_IOU),
                max_ttl: tracking.max_ttl.unwrap_or(DEFAULT_TRACK_TTL),
            },
            emit: EmitSettings {
                target: emit.target.unwrap_or_default(),
                out: emit.out.unwrap_or_else(|| DEFAULT_OUT.to_string()),
                schema_version: emit
                    .schema_version
                    .unwrap_or_else(|| DEFAULT_SCHEMA_VERSION.to_string()),
                mqtt: MqttSettings {
                    host: mqtt.host.unwrap_or_else(|| DEFAULT_MQTT_HOST.to_string()),
                    port: mqtt.port.unwrap_or(DEFAULT_MQTT_PORT),
                    topic_prefix: mqtt
                        .topic_prefix
                        .unwrap_or_else(|| DEFAULT_MQTT_PREFIX.to_string()),
                    client_id: mqtt
                        .client_id
                        .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
                },
            },
            fps_log_interval: file.fps_log_interval.unwrap_or(DEFAULT_FPS_LOG_INTERVAL),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(src) = env_string("FRAMETRACK_SRC") {
            self.source.locator = src;
        }
        if let Some(store_id) = env_string("FRAMETRACK_STORE_ID") {
            self.ids.store_id = store_id;
        }
        if let Some(camera_id) = env_string("FRAMETRACK_CAMERA_ID") {
            self.ids.camera_id = camera_id;
        }
        if let Some(stream_id) = env_string("FRAMETRACK_STREAM_ID") {
            self.ids.stream_id = stream_id;
        }
        if let Some(run_id) = env_string("FRAMETRACK_RUN_ID") {
            self.ids.run_id = Some(run_id);
        }
        if let Some(model) = env_string("FRAMETRACK_MODEL") {
            self.detector.model = Some(PathBuf::from(model));
        }
        if let Some(conf) = env_parse::<f32>("FRAMETRACK_CONF", "a number")? {
            self.detector.confidence = conf;
        }
        if let Ok(classes) = std::env::var("FRAMETRACK_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                self.detector.classes = normalize_classes(parsed);
            }
        }
        if let Some(iou) = env_parse::<f32>("FRAMETRACK_TRACK_IOU", "a number")? {
            self.tracking.iou_threshold = iou;
        }
        if let Some(ttl) = env_parse::<u32>("FRAMETRACK_TRACK_TTL", "an integer frame count")? {
            self.tracking.max_ttl = ttl;
        }
        if let Some(interval) = env_parse::<u64>("FRAMETRACK_FPS_LOG", "an integer frame count")? {
            self.fps_log_interval = interval;
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        self.source.locator = self.source.locator.trim().to_string();
        if self.source.locator.is_empty() {
            return Err(anyhow!(
                "a source is required (FRAMETRACK_SRC, --src or source.locator)"
            ));
        }
        if self.source.open_timeout.is_zero() || self.source.pull_timeout.is_zero() {
            return Err(anyhow!("source timeouts must be greater than zero"));
        }
        if self.source.max_idle_polls == Some(0) {
            return Err(anyhow!("max_idle_polls must be at least 1 when set"));
        }
        for (name, value) in [
            ("detector confidence", self.detector.confidence),
            ("detector nms iou", self.detector.nms_iou),
            ("tracking iou threshold", self.tracking.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if self.tracking.max_ttl == 0 {
            return Err(anyhow!("tracking ttl must be at least one frame"));
        }
        if self.fps_log_interval == 0 {
            return Err(anyhow!("fps log interval must be at least one frame"));
        }
        if self.detector.kind == DetectorKind::Yolo && self.detector.model.is_none() {
            return Err(anyhow!("the yolo detector requires a model path"));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input size must be greater than zero"));
        }
        self.detector.classes = normalize_classes(std::mem::take(&mut self.detector.classes));
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<FrametrackConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, expected: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be {}", key, expected)),
        None => Ok(None),
    }
}

pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

fn normalize_classes(classes: Vec<String>) -> Vec<String> {
    classes
        .into_iter()
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = FrametrackConfig::from_file(FrametrackConfigFile::default());
        assert_eq!(cfg.source.backend, PipelineBackend::Gstreamer);
        assert_eq!(cfg.source.open_timeout, Duration::from_secs(5));
        assert_eq!(cfg.source.pull_timeout, Duration::from_secs(2));
        assert_eq!(cfg.source.max_idle_polls, None);
        assert_eq!(cfg.ids.store_id, "store_01");
        assert_eq!(cfg.detector.kind, DetectorKind::None);
        assert_eq!(cfg.detector.confidence, 0.25);
        assert!(cfg.detector.classes.is_empty());
        assert!(!cfg.tracking.enabled);
        assert_eq!(cfg.tracking.max_ttl, 30);
        assert_eq!(cfg.emit.target, EmitTarget::None);
        assert_eq!(cfg.emit.out, "-");
        assert_eq!(cfg.emit.mqtt.port, 1883);
        assert_eq!(cfg.fps_log_interval, 30);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let base = || {
            let mut cfg = FrametrackConfig::from_file(FrametrackConfigFile::default());
            cfg.source.locator = "stub://cam".into();
            cfg
        };
        assert!(base().validate().is_ok());

        let mut cfg = FrametrackConfig::from_file(FrametrackConfigFile::default());
        assert!(cfg.validate().is_err());

        let mut cfg = base();
        cfg.tracking.iou_threshold = 1.2;
        assert!(cfg.validate().is_err());

        let mut cfg = base();
        cfg.tracking.max_ttl = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base();
        cfg.detector.kind = DetectorKind::Yolo;
        assert!(cfg.validate().is_err());

        let mut cfg = base();
        cfg.fps_log_interval = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_names() {
        assert_eq!("Motion".parse::<DetectorKind>().unwrap(), DetectorKind::Motion);
        assert_eq!("detection".parse::<EmitTarget>().unwrap(), EmitTarget::Ndjson);
        assert!("kafka".parse::<EmitTarget>().is_err());
    }
}
