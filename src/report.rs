//! Summary of an emitted NDJSON record stream.

use std::collections::{BTreeMap, BTreeSet};
use std::io::BufRead;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::emit::FrameRecord;
use crate::track::TrackId;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClassSummary {
    pub detections: u64,
    pub unique_tracks: BTreeSet<TrackId>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TrackReport {
    pub frames: u64,
    pub detections: u64,
    /// Detections emitted with a null `track_id`.
    pub untracked_detections: u64,
    pub unique_tracks: BTreeSet<TrackId>,
    pub classes: BTreeMap<String, ClassSummary>,
    /// Distinct `pipeline_run_id`s in the stream.
    pub runs: BTreeSet<String>,
}

impl TrackReport {
    /// Reads one `FrameRecord` per line. Blank lines are skipped; a malformed
    /// line fails the report with its line number.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut report = Self::default();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("read line {}", idx + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: FrameRecord = serde_json::from_str(&line)
                .with_context(|| format!("line {} is not a frame record", idx + 1))?;
            report.add(&record);
        }
        Ok(report)
    }

    pub fn add(&mut self, record: &FrameRecord) {
        self.frames += 1;
        self.runs.insert(record.pipeline_run_id.clone());
        for det in &record.detections {
            self.detections += 1;
            let class = self.classes.entry(det.class_name.clone()).or_default();
            class.detections += 1;
            match det.track_id {
                Some(id) => {
                    self.unique_tracks.insert(id);
                    class.unique_tracks.insert(id);
                }
                None => self.untracked_detections += 1,
            }
        }
    }
}

impl std::fmt::Display for TrackReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "frames: {}", self.frames)?;
        writeln!(f, "runs: {}", self.runs.len())?;
        writeln!(f, "detections: {}", self.detections)?;
        writeln!(f, "untracked detections: {}", self.untracked_detections)?;
        writeln!(f, "unique track ids: {}", self.unique_tracks.len())?;
        for (name, class) in &self.classes {
            writeln!(
                f,
                "  {}: {} detections, {} unique ids",
                name,
                class.detections,
                class.unique_tracks.len()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = r#"{"schema_version":"1.0","pipeline_run_id":"r1","source":{"store_id":"s","camera_id":"c","stream_id":"st"},"frame_index":1,"capture_ts":"2024-05-01T12:00:00.000000+00:00","image_size":{"width":100,"height":100},"detections":[{"det_id":"1-0","class":"person","class_id":0,"conf":0.9,"bbox":{"x1":0,"y1":0,"x2":10,"y2":10},"bbox_norm":{"x":0.0,"y":0.0,"w":0.1,"h":0.1},"centroid":{"x":5,"y":5},"track_id":1},{"det_id":"1-1","class":"bag","class_id":24,"conf":0.5,"bbox":{"x1":20,"y1":20,"x2":30,"y2":30},"bbox_norm":{"x":0.2,"y":0.2,"w":0.1,"h":0.1},"centroid":{"x":25,"y":25},"track_id":null}]}

{"schema_version":"1.0","pipeline_run_id":"r1","source":{"store_id":"s","camera_id":"c","stream_id":"st"},"frame_index":2,"capture_ts":"2024-05-01T12:00:00.040000+00:00","image_size":{"width":100,"height":100},"detections":[{"det_id":"2-0","class":"person","class_id":0,"conf":0.9,"bbox":{"x1":1,"y1":1,"x2":11,"y2":11},"bbox_norm":{"x":0.01,"y":0.01,"w":0.1,"h":0.1},"centroid":{"x":6,"y":6},"track_id":1},{"det_id":"2-1","class":"person","class_id":0,"conf":0.8,"bbox":{"x1":50,"y1":50,"x2":60,"y2":60},"bbox_norm":{"x":0.5,"y":0.5,"w":0.1,"h":0.1},"centroid":{"x":55,"y":55},"track_id":2}]}
"#;

    #[test]
    fn summarises_tracks_per_class() -> Result<()> {
        let report = TrackReport::from_reader(STREAM.as_bytes())?;
        assert_eq!(report.frames, 2);
        assert_eq!(report.detections, 4);
        assert_eq!(report.untracked_detections, 1);
        assert_eq!(report.unique_tracks.len(), 2);
        assert_eq!(report.runs.len(), 1);
        let person = &report.classes["person"];
        assert_eq!(person.detections, 3);
        assert_eq!(person.unique_tracks.len(), 2);
        assert_eq!(report.classes["bag"].unique_tracks.len(), 0);
        assert!(report.to_string().contains("unique track ids: 2"));
        Ok(())
    }

    #[test]
    fn reports_malformed_line_number() {
        let err = TrackReport::from_reader("{\"frame_index\": 1}\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }
}
