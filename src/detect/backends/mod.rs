pub mod null;
pub mod replay;

pub use null::{NullDetector, NullFactory};
pub use replay::{sidecar_path, ReplayDetector, ReplayFactory, TrackScript, SIDECAR_SUFFIX};
