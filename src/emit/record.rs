use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::bbox::{BoundingBox, Centroid, ImageSize, NormalizedBox};
use crate::detect::Detection;
use crate::track::{TrackId, TrackedDetection};

pub const DEFAULT_SCHEMA_VERSION: &str = "1.0";

/// Identifies the camera stream a record came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub store_id: String,
    pub camera_id: String,
    pub stream_id: String,
}

/// Per-run constants stamped on every record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordContext {
    pub schema_version: String,
    pub pipeline_run_id: String,
    pub source: SourceInfo,
}

impl RecordContext {
    /// Context with a fresh run id unless one is supplied.
    pub fn new(source: SourceInfo, run_id: Option<String>) -> Self {
        Self {
            schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
            pipeline_run_id: run_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(new_run_id),
            source,
        }
    }
}

/// Random 128-bit run id, hex encoded.
pub fn new_run_id() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionEntry {
    /// `"{frame_index}-{position}"`.
    pub det_id: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub class_id: u32,
    pub conf: f32,
    pub bbox: BoundingBox,
    pub bbox_norm: NormalizedBox,
    pub centroid: Centroid,
    pub track_id: Option<TrackId>,
}

/// One emitted line: everything seen on one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub schema_version: String,
    pub pipeline_run_id: String,
    pub source: SourceInfo,
    /// 1-based.
    pub frame_index: u64,
    pub capture_ts: String,
    pub image_size: ImageSize,
    pub detections: Vec<DetectionEntry>,
}

impl FrameRecord {
    /// Pairs detection `i` with tracked detection `i`. When `tracked` is absent
    /// or its length disagrees with `detections`, every `track_id` is null.
    pub fn build(
        context: &RecordContext,
        frame_index: u64,
        captured_at: DateTime<Utc>,
        image_size: ImageSize,
        detections: &[Detection],
        tracked: Option<&[TrackedDetection]>,
    ) -> Self {
        let tracked = match tracked {
            Some(tracked) if tracked.len() == detections.len() => Some(tracked),
            Some(tracked) => {
                log::warn!(
                    "frame {}: tracker returned {} entries for {} detections, dropping track ids",
                    frame_index,
                    tracked.len(),
                    detections.len()
                );
                None
            }
            None => None,
        };

        let detections = detections
            .iter()
            .enumerate()
            .map(|(i, det)| DetectionEntry {
                det_id: format!("{}-{}", frame_index, i),
                class_name: det.class_name.clone(),
                class_id: det.class_id,
                conf: det.confidence,
                bbox: det.bbox,
                bbox_norm: det.bbox.normalized(image_size),
                centroid: det.bbox.centroid(),
                track_id: tracked.and_then(|t| t[i].track_id),
            })
            .collect();

        Self {
            schema_version: context.schema_version.clone(),
            pipeline_run_id: context.pipeline_run_id.clone(),
            source: context.source.clone(),
            frame_index,
            capture_ts: captured_at.to_rfc3339_opts(SecondsFormat::Micros, false),
            image_size,
            detections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn context() -> RecordContext {
        RecordContext::new(
            SourceInfo {
                store_id: "store_01".into(),
                camera_id: "cam_01".into(),
                stream_id: "stream_01".into(),
            },
            Some("run-1".into()),
        )
    }

    fn det(x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
        Detection::new(BoundingBox::new(x1, y1, x2, y2), 0.75, 0, "person")
    }

    #[test]
    fn generated_run_ids_are_128_bit_hex() {
        let id = new_run_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_run_id());
        assert_eq!(RecordContext::new(context().source, None).pipeline_run_id.len(), 32);
    }

    #[test]
    fn builds_record_with_track_ids() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let dets = vec![det(10, 20, 30, 60), det(0, 0, 4, 4)];
        let tracked = vec![
            TrackedDetection::from_detection(&dets[0], Some(TrackId(3))),
            TrackedDetection::from_detection(&dets[1], None),
        ];
        let record = FrameRecord::build(
            &context(),
            7,
            ts,
            ImageSize::new(100, 200),
            &dets,
            Some(&tracked),
        );

        assert_eq!(record.capture_ts, "2024-05-01T12:00:00.000000+00:00");
        assert_eq!(record.detections[0].det_id, "7-0");
        assert_eq!(record.detections[1].det_id, "7-1");
        assert_eq!(record.detections[0].track_id, Some(TrackId(3)));
        assert_eq!(record.detections[1].track_id, None);

        let norm = record.detections[0].bbox_norm;
        assert!((norm.x - 0.1).abs() < 1e-9);
        assert!((norm.y - 0.1).abs() < 1e-9);
        assert!((norm.w - 0.2).abs() < 1e-9);
        assert!((norm.h - 0.2).abs() < 1e-9);
        assert_eq!(record.detections[0].centroid, Centroid { x: 20, y: 40 });
    }

    #[test]
    fn length_mismatch_nulls_every_track_id() {
        let dets = vec![det(0, 0, 10, 10), det(20, 20, 30, 30)];
        let tracked = vec![TrackedDetection::from_detection(&dets[0], Some(TrackId(1)))];
        let record = FrameRecord::build(
            &context(),
            1,
            Utc::now(),
            ImageSize::new(64, 64),
            &dets,
            Some(&tracked),
        );
        assert!(record.detections.iter().all(|d| d.track_id.is_none()));
    }

    #[test]
    fn serializes_wire_field_names() {
        let dets = vec![det(1, 2, 3, 4)];
        let record = FrameRecord::build(&context(), 1, Utc::now(), ImageSize::new(8, 8), &dets, None);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["schema_version"], "1.0");
        assert_eq!(json["source"]["camera_id"], "cam_01");
        assert_eq!(json["detections"][0]["class"], "person");
        assert_eq!(json["detections"][0]["bbox"]["x2"], 3);
        assert!(json["detections"][0]["track_id"].is_null());
        assert_eq!(json["image_size"]["width"], 8);
    }
}
