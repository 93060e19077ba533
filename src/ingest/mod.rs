//! Video sources.
//!
//! A source yields decoded frames in order, 1-based, at processing
//! resolution (see [`crate::frame::processing_size`]). Sources are local
//! only:
//! - `stub://name?frames=N&fps=F&width=W&height=H` synthesizes frames (tests, demos)
//! - local files are decoded with FFmpeg (feature: ingest-file-ffmpeg)
//! - a detector's recorded timeline stands in when a file cannot be decoded
//!
//! Decoded frames stay in memory and are dropped after the detector sees them.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod timeline;

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

pub use file::{is_local_file_path, FileSource};
pub use timeline::TimelineSource;

/// Container metadata, known once the source is open.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Frame count reported by the container. May be 0 when unknown.
    pub total_frames: u64,
    pub fps: f64,
    /// Processing resolution (after any downscaling).
    pub width: u32,
    pub height: u32,
}

pub trait VideoSource: Send {
    fn info(&self) -> VideoInfo;

    /// Decode the next frame. `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Advance past one frame without handing it out. Returns `false` at end
    /// of stream. Sources that can avoid pixel conversion should override.
    fn skip_frame(&mut self) -> Result<bool> {
        Ok(self.next_frame()?.is_some())
    }
}

/// Opens a video by reference (local path or `stub://`).
pub fn open_video(video_ref: &Path) -> Result<Box<dyn VideoSource>> {
    Ok(Box::new(FileSource::open(video_ref)?))
}

/// Opens a video, or steps through `timeline` when the file exists but
/// cannot be decoded in this build.
pub fn open_video_or_timeline(
    video_ref: &Path,
    timeline: Option<VideoInfo>,
) -> Result<Box<dyn VideoSource>> {
    match (open_video(video_ref), timeline) {
        (Ok(source), _) => Ok(source),
        (Err(err), Some(info)) if video_ref.is_file() => {
            log::info!(
                "{}: {:#}; using recorded timeline ({} frames at {}x{})",
                video_ref.display(),
                err,
                info.total_frames,
                info.width,
                info.height
            );
            Ok(Box::new(TimelineSource::new(info)))
        }
        (Err(err), _) => Err(err),
    }
}
