use anyhow::Result;

use crate::bbox::BoundingBox;
use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::VideoFrame;

pub const MOTION_CLASS_ID: u32 = 0;
pub const MOTION_CLASS_NAME: &str = "motion";

const DEFAULT_PIXEL_THRESHOLD: u8 = 25;
const DEFAULT_MIN_CHANGED_PIXELS: usize = 16;

/// Frame-differencing backend.
///
/// Compares the luma of consecutive frames and reports one `motion` box that
/// covers every changed pixel. The first frame, and the first frame after a
/// resolution change, never produce detections.
pub struct MotionBackend {
    previous: Option<(u32, u32, Vec<u8>)>,
    pixel_threshold: u8,
    min_changed_pixels: usize,
}

impl MotionBackend {
    pub fn new() -> Self {
        Self {
            previous: None,
            pixel_threshold: DEFAULT_PIXEL_THRESHOLD,
            min_changed_pixels: DEFAULT_MIN_CHANGED_PIXELS,
        }
    }

    /// Minimum per-pixel luma difference counted as a change.
    pub fn with_pixel_threshold(mut self, threshold: u8) -> Self {
        self.pixel_threshold = threshold;
        self
    }

    /// Minimum number of changed pixels before a box is reported.
    pub fn with_min_changed_pixels(mut self, count: usize) -> Self {
        self.min_changed_pixels = count.max(1);
        self
    }
}

impl Default for MotionBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for MotionBackend {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<Detection>> {
        let luma = to_luma(frame.pixels());
        let previous = self.previous.replace((frame.width, frame.height, luma));

        let Some((prev_w, prev_h, prev_luma)) = previous else {
            return Ok(Vec::new());
        };
        if prev_w != frame.width || prev_h != frame.height {
            return Ok(Vec::new());
        }
        let Some((_, _, current)) = self.previous.as_ref() else {
            return Ok(Vec::new());
        };

        let width = frame.width as usize;
        let mut changed = 0usize;
        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);
        for (idx, (&now, &before)) in current.iter().zip(prev_luma.iter()).enumerate() {
            if now.abs_diff(before) <= self.pixel_threshold {
                continue;
            }
            let (x, y) = (idx % width, idx / width);
            changed += 1;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        if changed < self.min_changed_pixels {
            return Ok(Vec::new());
        }

        let bbox = BoundingBox::new(
            min_x as i32,
            min_y as i32,
            max_x as i32 + 1,
            max_y as i32 + 1,
        );
        let confidence = (changed as f32 / bbox.area().max(1) as f32).min(1.0);
        Ok(vec![Detection::new(
            bbox,
            confidence,
            MOTION_CLASS_ID,
            MOTION_CLASS_NAME,
        )])
    }
}

/// BT.601 luma, integer arithmetic.
fn to_luma(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|px| ((px[0] as u32 * 299 + px[1] as u32 * 587 + px[2] as u32 * 114) / 1000) as u8)
        .collect()
}
