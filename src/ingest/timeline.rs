//! Pixel-less source for videos whose detections were recorded elsewhere.

use anyhow::Result;

use super::{VideoInfo, VideoSource};
use crate::frame::Frame;

/// Steps through `total_frames` empty frames at the given geometry.
pub struct TimelineSource {
    info: VideoInfo,
    position: u64,
}

impl TimelineSource {
    pub fn new(info: VideoInfo) -> Self {
        Self { info, position: 0 }
    }
}

impl VideoSource for TimelineSource {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.skip_frame()? {
            return Ok(None);
        }
        Ok(Some(Frame::new(
            Vec::new(),
            self.position,
            self.info.width,
            self.info.height,
        )))
    }

    fn skip_frame(&mut self) -> Result<bool> {
        if self.position >= self.info.total_frames {
            return Ok(false);
        }
        self.position += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_empty_frames_in_order() {
        let mut source = TimelineSource::new(VideoInfo {
            total_frames: 3,
            fps: 10.0,
            width: 64,
            height: 48,
        });
        let first = source.next_frame().unwrap().unwrap();
        assert_eq!((first.index, first.width, first.height), (1, 64, 48));
        assert_eq!(first.byte_len(), 0);
        assert!(source.skip_frame().unwrap());
        assert_eq!(source.next_frame().unwrap().unwrap().index, 3);
        assert!(source.next_frame().unwrap().is_none());
    }
}
