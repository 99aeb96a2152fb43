pub mod motion;

#[cfg(feature = "backend-tract")]
pub mod yolo;

pub use motion::MotionBackend;

#[cfg(feature = "backend-tract")]
pub use yolo::YoloBackend;
