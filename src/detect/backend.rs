use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::VideoFrame;

/// Turns one frame into pixel-space boxes.
///
/// The orchestrator treats a backend as a pure function from one frame to a
/// list of boxes. Model loading belongs in the constructor so that a missing or
/// broken model fails the run at startup, never mid-stream.
pub trait DetectorBackend: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Boxes for `frame`, which is borrowed for the duration of the call only.
    /// An error costs this frame its detections; the run continues.
    fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<Detection>>;

    /// Called once before the first frame is read. Errors abort the run.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
