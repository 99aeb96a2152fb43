use std::collections::HashSet;

use crate::detect::result::Detection;

/// Confidence floor plus optional class allow-list applied to raw detector output.
#[derive(Clone, Debug, Default)]
pub struct DetectionFilter {
    min_confidence: f32,
    /// Lower-cased class names; `None` admits every class.
    classes: Option<HashSet<String>>,
}

impl DetectionFilter {
    pub fn new<I, S>(min_confidence: f32, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let classes: HashSet<String> = classes
            .into_iter()
            .map(|c| c.as_ref().trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        Self {
            min_confidence,
            classes: if classes.is_empty() { None } else { Some(classes) },
        }
    }

    /// Filter that keeps everything.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn admits(&self, detection: &Detection) -> bool {
        if detection.confidence < self.min_confidence {
            return false;
        }
        match &self.classes {
            Some(classes) => classes.contains(&detection.class_name.to_lowercase()),
            None => true,
        }
    }

    /// Drops inadmissible detections, keeping the survivors in their original order.
    pub fn apply(&self, mut detections: Vec<Detection>) -> Vec<Detection> {
        detections.retain(|d| self.admits(d));
        detections
    }
}
