use std::path::Path;

use anyhow::Result;

use crate::detect::backend::{DetectorFactory, TrackingDetector};
use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Detector that never sees anything. Useful for exercising decode and
/// scheduling without tracker output.
#[derive(Default)]
pub struct NullDetector {
    frames_seen: u64,
}

impl NullDetector {
    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl TrackingDetector for NullDetector {
    fn name(&self) -> &'static str {
        "null"
    }

    fn track(&mut self, _frame: &Frame, _conf_threshold: f32) -> Result<Vec<RawDetection>> {
        self.frames_seen += 1;
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub struct NullFactory;

impl DetectorFactory for NullFactory {
    fn name(&self) -> &'static str {
        "null"
    }

    fn create(&self, _video_ref: &Path) -> Result<Box<dyn TrackingDetector>> {
        Ok(Box::new(NullDetector::default()))
    }
}
