//! Multi-object tracking.
//!
//! A tracker turns one frame's detections into the same number of tracked
//! detections, in the same order. Downstream consumers pair detection `i` with
//! tracked detection `i` positionally, so implementations must never drop,
//! duplicate or reorder entries.
//!
//! Two implementations share the `Tracker` trait:
//! - `IouTracker`: in-house greedy IoU matcher with TTL eviction
//! - `ReidAdapter`: aligns an external re-identification tracker's output back
//!   onto the input detections

mod iou_tracker;
mod reid;

use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;
use crate::detect::Detection;
use crate::frame::VideoFrame;

pub use iou_tracker::{IouTracker, IouTrackerConfig, Track};
pub use reid::{ExternalTrack, ReidAdapter, ReidBackend, DEFAULT_REID_MIN_IOU};

/// Process-unique track identity. Ids start at 1 and are never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tracker output for one input detection. `track_id` is `None` when the
/// detection carries no identity (tracking disabled or unmatched).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedDetection {
    pub bbox: BoundingBox,
    pub track_id: Option<TrackId>,
    pub confidence: f32,
    pub class_name: String,
}

impl TrackedDetection {
    pub fn from_detection(detection: &Detection, track_id: Option<TrackId>) -> Self {
        Self {
            bbox: detection.bbox,
            track_id,
            confidence: detection.confidence,
            class_name: detection.class_name.clone(),
        }
    }

    /// Identity-less output, used when tracking is disabled.
    pub fn untracked(detections: &[Detection]) -> Vec<Self> {
        detections
            .iter()
            .map(|d| Self::from_detection(d, None))
            .collect()
    }
}

/// Shared tracking capability, selected at configuration time.
pub trait Tracker {
    /// Tracker identifier.
    fn name(&self) -> &'static str;

    /// Advance one frame. Returns exactly one entry per detection, in input order.
    fn update(&mut self, detections: &[Detection]) -> Vec<TrackedDetection>;

    /// Same as `update`, for trackers that also look at the pixels.
    fn update_with_frame(
        &mut self,
        _frame: &VideoFrame,
        detections: &[Detection],
    ) -> Vec<TrackedDetection> {
        self.update(detections)
    }

    /// Number of identities currently alive.
    fn active_tracks(&self) -> usize;
}
