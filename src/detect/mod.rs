//! Object detection collaborators.
//!
//! The core only needs "frame in, boxes out"; backends live behind
//! `DetectorBackend` and the orchestrator owns exactly one of them.

mod backend;
pub mod backends;
mod filter;
mod result;

pub use backend::DetectorBackend;
pub use backends::MotionBackend;
#[cfg(feature = "backend-tract")]
pub use backends::YoloBackend;
pub use filter::DetectionFilter;
pub use result::Detection;
