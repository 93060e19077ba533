use std::path::Path;

use anyhow::Result;

use crate::detect::result::RawDetection;
use crate::frame::Frame;
use crate::ingest::VideoInfo;

/// Detector + tracker collaborator.
///
/// One instance serves one video: tracker state (track id continuity) lives
/// inside the instance, so a fresh one is created per job through a
/// [`DetectorFactory`].
///
/// Implementations may return any class ids; the aggregator drops non-vehicle
/// classes and untracked entries.
pub trait TrackingDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Detect and track objects on one sampled frame.
    fn track(&mut self, frame: &Frame, conf_threshold: f32) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Frame geometry the detector already holds for its video. Lets a run
    /// step through frames the process cannot decode itself.
    fn timeline(&self) -> Option<VideoInfo> {
        None
    }
}

/// Creates a fresh detector for a video.
pub trait DetectorFactory: Send + Sync {
    fn name(&self) -> &'static str;

    fn create(&self, video_ref: &Path) -> Result<Box<dyn TrackingDetector>>;
}
