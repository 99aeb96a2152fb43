use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;

/// One detector hit on the current frame. Not retained across frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    pub class_id: u32,
    pub class_name: String,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32, class_id: u32, class_name: impl Into<String>) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
            class_name: class_name.into(),
        }
    }
}
