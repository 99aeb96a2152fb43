use anyhow::Result;

use crate::bbox::{iou, BoundingBox};
use crate::detect::Detection;
use crate::frame::VideoFrame;
use crate::track::{TrackId, TrackedDetection, Tracker};

/// Minimum IoU for an external track to be attributed to a detection.
pub const DEFAULT_REID_MIN_IOU: f32 = 0.5;

/// Track as reported by an external re-identification tracker.
#[derive(Clone, Debug, PartialEq)]
pub struct ExternalTrack {
    pub track_id: u64,
    /// Box of the detection the tracker associated this frame, if any.
    pub bbox: Option<BoundingBox>,
    /// Tentative tracks are ignored during alignment.
    pub confirmed: bool,
    pub class_name: Option<String>,
    pub confidence: Option<f32>,
}

/// External tracker whose output is a set of tracks, not a list aligned
/// with the input detections.
pub trait ReidBackend {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Feed one frame's detections and return the tracker's current tracks.
    fn update_tracks(
        &mut self,
        detections: &[Detection],
        frame: Option<&VideoFrame>,
    ) -> Result<Vec<ExternalTrack>>;

    /// Tracks the backend currently holds, when it can tell.
    fn active_tracks(&self) -> usize {
        0
    }
}

/// Makes a `ReidBackend` honour the positional `Tracker` contract.
///
/// Each detection is matched to the confirmed external track with the highest
/// IoU; below `min_iou` the detection gets no identity. Matching is per
/// detection, without claims, so two detections may resolve to the same track.
/// Backend failures degrade the frame to identity-less output instead of
/// failing it.
pub struct ReidAdapter<B> {
    backend: B,
    min_iou: f32,
}

impl<B: ReidBackend> ReidAdapter<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            min_iou: DEFAULT_REID_MIN_IOU,
        }
    }

    pub fn with_min_iou(mut self, min_iou: f32) -> Self {
        self.min_iou = min_iou;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn align(&mut self, detections: &[Detection], frame: Option<&VideoFrame>) -> Vec<TrackedDetection> {
        let tracks = match self.backend.update_tracks(detections, frame) {
            Ok(tracks) => tracks,
            Err(e) => {
                log::warn!(
                    "ReidAdapter: {} update failed, emitting untracked frame: {:#}",
                    self.backend.name(),
                    e
                );
                return TrackedDetection::untracked(detections);
            }
        };

        let candidates: Vec<(TrackId, BoundingBox)> = tracks
            .iter()
            .filter(|t| t.confirmed && t.track_id > 0)
            .filter_map(|t| t.bbox.map(|bbox| (TrackId(t.track_id), bbox)))
            .collect();

        detections
            .iter()
            .map(|detection| {
                let mut best: Option<(TrackId, f32)> = None;
                for (id, bbox) in &candidates {
                    let overlap = iou(&detection.bbox, bbox);
                    if overlap > best.map_or(0.0, |(_, b)| b) {
                        best = Some((*id, overlap));
                    }
                }
                let track_id = best
                    .filter(|(_, overlap)| *overlap >= self.min_iou)
                    .map(|(id, _)| id);
                TrackedDetection::from_detection(detection, track_id)
            })
            .collect()
    }
}

impl<B: ReidBackend> Tracker for ReidAdapter<B> {
    fn name(&self) -> &'static str {
        self.backend.name()
    }

    fn update(&mut self, detections: &[Detection]) -> Vec<TrackedDetection> {
        self.align(detections, None)
    }

    fn update_with_frame(&mut self, frame: &VideoFrame, detections: &[Detection]) -> Vec<TrackedDetection> {
        self.align(detections, Some(frame))
    }

    fn active_tracks(&self) -> usize {
        self.backend.active_tracks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct FixedBackend {
        tracks: Vec<ExternalTrack>,
        fail: bool,
        saw_frame: bool,
    }

    impl ReidBackend for FixedBackend {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn update_tracks(
            &mut self,
            _detections: &[Detection],
            frame: Option<&VideoFrame>,
        ) -> Result<Vec<ExternalTrack>> {
            self.saw_frame = frame.is_some();
            if self.fail {
                return Err(anyhow!("embedder unavailable"));
            }
            Ok(self.tracks.clone())
        }
    }

    fn ext(id: u64, bbox: BoundingBox, confirmed: bool) -> ExternalTrack {
        ExternalTrack {
            track_id: id,
            bbox: Some(bbox),
            confirmed,
            class_name: Some("person".into()),
            confidence: Some(0.8),
        }
    }

    fn det(x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
        Detection::new(BoundingBox::new(x1, y1, x2, y2), 0.7, 0, "person")
    }

    #[test]
    fn aligns_tracks_back_onto_detections() {
        let backend = FixedBackend {
            tracks: vec![
                ext(9, BoundingBox::new(100, 100, 120, 120), true),
                ext(4, BoundingBox::new(0, 0, 10, 10), true),
            ],
            fail: false,
            saw_frame: false,
        };
        let mut adapter = ReidAdapter::new(backend);
        let out = adapter.update(&[det(0, 0, 10, 10), det(50, 50, 60, 60), det(101, 101, 121, 121)]);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].track_id, Some(TrackId(4)));
        assert_eq!(out[1].track_id, None);
        assert_eq!(out[2].track_id, Some(TrackId(9)));
        // Detection attributes win over the backend's.
        assert_eq!(out[0].confidence, 0.7);
    }

    #[test]
    fn ignores_tentative_and_weak_matches() {
        let backend = FixedBackend {
            tracks: vec![
                ext(1, BoundingBox::new(0, 0, 10, 10), false),
                // IoU 50 / 150 against the detection below.
                ext(2, BoundingBox::new(5, 0, 15, 10), true),
            ],
            fail: false,
            saw_frame: false,
        };
        let mut adapter = ReidAdapter::new(backend);
        let out = adapter.update(&[det(0, 0, 10, 10)]);
        assert_eq!(out[0].track_id, None);
    }

    #[test]
    fn backend_failure_degrades_to_untracked() {
        let backend = FixedBackend {
            tracks: vec![],
            fail: true,
            saw_frame: false,
        };
        let mut adapter = ReidAdapter::new(backend);
        let out = adapter.update(&[det(0, 0, 10, 10), det(20, 20, 30, 30)]);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|t| t.track_id.is_none()));
    }

    #[test]
    fn frame_is_forwarded_to_backend() {
        let backend = FixedBackend {
            tracks: vec![],
            fail: false,
            saw_frame: false,
        };
        let mut adapter = ReidAdapter::new(backend);
        let frame = VideoFrame::new(vec![0u8; 12], 2, 2).unwrap();
        adapter.update_with_frame(&frame, &[]);
        assert!(adapter.backend().saw_frame);
    }
}
