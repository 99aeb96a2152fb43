use std::collections::{BTreeMap, HashSet};

use anyhow::{anyhow, Result};

use crate::bbox::{iou, BoundingBox};
use crate::detect::Detection;
use crate::track::{TrackId, TrackedDetection, Tracker};

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.3;
pub const DEFAULT_MAX_TTL: u32 = 30;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IouTrackerConfig {
    /// Minimum IoU for a detection to continue an existing track.
    pub iou_threshold: f32,
    /// Frames a track survives without a match.
    pub max_ttl: u32,
}

impl Default for IouTrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            max_ttl: DEFAULT_MAX_TTL,
        }
    }
}

impl IouTrackerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(anyhow!(
                "iou threshold must be within [0, 1], got {}",
                self.iou_threshold
            ));
        }
        if self.max_ttl == 0 {
            return Err(anyhow!("track ttl must be at least one frame"));
        }
        Ok(())
    }
}

/// Live identity state.
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub bbox: BoundingBox,
    /// Remaining frames before eviction.
    pub ttl: u32,
    pub class_name: String,
    pub confidence: f32,
}

/// Greedy IoU tracker.
///
/// Detections are matched in input order, so when two detections want the same
/// track the earlier one wins and the later one falls back to its best
/// remaining track or a fresh id. This is not a globally optimal assignment.
pub struct IouTracker {
    config: IouTrackerConfig,
    next_id: u64,
    /// Keyed by id so candidate scans run oldest-first and ties resolve the same way every time.
    tracks: BTreeMap<TrackId, Track>,
}

impl IouTracker {
    pub fn new(config: IouTrackerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            next_id: 1,
            tracks: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &IouTrackerConfig {
        &self.config
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    /// Decrement every ttl and evict the expired tracks.
    fn age_tracks(&mut self) {
        self.tracks.retain(|id, track| {
            track.ttl = track.ttl.saturating_sub(1);
            if track.ttl == 0 {
                log::debug!("IouTracker: track {} expired", id);
                return false;
            }
            true
        });
    }

    /// Unclaimed live track with the strictly highest IoU, if it clears the threshold.
    fn best_match(&self, bbox: &BoundingBox, claimed: &HashSet<TrackId>) -> Option<TrackId> {
        let mut best: Option<(TrackId, f32)> = None;
        for (id, track) in &self.tracks {
            if claimed.contains(id) {
                continue;
            }
            let overlap = iou(bbox, &track.bbox);
            if overlap > best.map_or(0.0, |(_, b)| b) {
                best = Some((*id, overlap));
            }
        }
        best.filter(|(_, overlap)| *overlap >= self.config.iou_threshold)
            .map(|(id, _)| id)
    }

    fn spawn(&mut self, detection: &Detection) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id += 1;
        self.tracks.insert(
            id,
            Track {
                id,
                bbox: detection.bbox,
                ttl: self.config.max_ttl,
                class_name: detection.class_name.clone(),
                confidence: detection.confidence,
            },
        );
        id
    }
}

impl Tracker for IouTracker {
    fn name(&self) -> &'static str {
        "iou"
    }

    fn update(&mut self, detections: &[Detection]) -> Vec<TrackedDetection> {
        self.age_tracks();

        let mut claimed = HashSet::with_capacity(detections.len());
        let mut tracked = Vec::with_capacity(detections.len());
        for detection in detections {
            let id = match self.best_match(&detection.bbox, &claimed) {
                Some(id) => {
                    if let Some(track) = self.tracks.get_mut(&id) {
                        track.bbox = detection.bbox;
                        track.ttl = self.config.max_ttl;
                        track.class_name.clone_from(&detection.class_name);
                        track.confidence = detection.confidence;
                    }
                    id
                }
                None => self.spawn(detection),
            };
            claimed.insert(id);
            tracked.push(TrackedDetection::from_detection(detection, Some(id)));
        }

        debug_assert_eq!(tracked.len(), detections.len());
        tracked
    }

    fn active_tracks(&self) -> usize {
        self.tracks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
        Detection::new(BoundingBox::new(x1, y1, x2, y2), 0.9, 0, "x")
    }

    fn tracker(iou_threshold: f32, max_ttl: u32) -> IouTracker {
        IouTracker::new(IouTrackerConfig {
            iou_threshold,
            max_ttl,
        })
        .unwrap()
    }

    fn ids(out: &[TrackedDetection]) -> Vec<u64> {
        out.iter().map(|t| t.track_id.unwrap().0).collect()
    }

    #[test]
    fn rejects_invalid_config() {
        assert!(IouTracker::new(IouTrackerConfig { iou_threshold: 1.5, max_ttl: 3 }).is_err());
        assert!(IouTracker::new(IouTrackerConfig { iou_threshold: 0.3, max_ttl: 0 }).is_err());
    }

    #[test]
    fn keeps_identity_across_overlapping_frames() {
        let mut t = tracker(0.3, 30);
        assert_eq!(ids(&t.update(&[det(0, 0, 10, 10)])), vec![1]);
        assert_eq!(ids(&t.update(&[det(1, 1, 11, 11)])), vec![1]);
        assert_eq!(t.track(TrackId(1)).unwrap().bbox, BoundingBox::new(1, 1, 11, 11));
    }

    #[test]
    fn output_preserves_input_order() {
        let mut t = tracker(0.3, 30);
        t.update(&[det(0, 0, 10, 10), det(100, 100, 110, 110)]);
        // Same objects, reversed order: ids follow the boxes, not the positions.
        let out = t.update(&[det(100, 100, 110, 110), det(0, 0, 10, 10)]);
        assert_eq!(ids(&out), vec![2, 1]);
        assert_eq!(out[0].bbox, BoundingBox::new(100, 100, 110, 110));
    }

    #[test]
    fn first_detection_claims_contested_track() {
        let mut t = tracker(0.3, 30);
        t.update(&[det(0, 0, 10, 10)]);
        let out = t.update(&[det(0, 0, 10, 10), det(0, 0, 10, 10)]);
        assert_eq!(ids(&out), vec![1, 2]);
    }

    #[test]
    fn later_detection_falls_back_to_next_best_track() {
        let mut t = tracker(0.3, 30);
        t.update(&[det(0, 0, 10, 10), det(2, 0, 12, 10)]);
        // Both detections overlap track 1 best; the second takes track 2.
        let out = t.update(&[det(0, 0, 10, 10), det(1, 0, 11, 10)]);
        assert_eq!(ids(&out), vec![1, 2]);
    }

    #[test]
    fn below_threshold_spawns_new_track() {
        let mut t = tracker(0.5, 30);
        t.update(&[det(0, 0, 10, 10)]);
        // IoU = 50 / 150
        let out = t.update(&[det(5, 0, 15, 10)]);
        assert_eq!(ids(&out), vec![2]);
        assert_eq!(t.active_tracks(), 2);
    }

    #[test]
    fn matched_track_refreshes_ttl_and_class() {
        let mut t = tracker(0.3, 3);
        t.update(&[det(0, 0, 10, 10)]);
        t.update(&[]);
        assert_eq!(t.track(TrackId(1)).unwrap().ttl, 2);
        let refreshed = Detection::new(BoundingBox::new(0, 0, 10, 10), 0.4, 7, "bag");
        t.update(&[refreshed]);
        let track = t.track(TrackId(1)).unwrap();
        assert_eq!(track.ttl, 3);
        assert_eq!(track.class_name, "bag");
        assert_eq!(track.confidence, 0.4);
    }

    #[test]
    fn empty_update_still_ages_tracks() {
        let mut t = tracker(0.3, 1);
        t.update(&[det(0, 0, 10, 10)]);
        assert!(t.update(&[]).is_empty());
        assert_eq!(t.active_tracks(), 0);
    }
}
