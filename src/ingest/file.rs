//! Local file video source.
//!
//! `FileSource` picks a backend from the reference: `stub://` references
//! are synthesized in memory, anything else is opened as a local file with
//! FFmpeg when that feature is enabled. URL schemes are rejected.

use std::path::Path;

use anyhow::{anyhow, Context, Result};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::{VideoInfo, VideoSource};
use crate::frame::{processing_size, Frame};

pub const STUB_SCHEME: &str = "stub://";

const STUB_DEFAULT_FRAMES: u64 = 300;
const STUB_DEFAULT_FPS: f64 = 30.0;
const STUB_DEFAULT_WIDTH: u32 = 640;
const STUB_DEFAULT_HEIGHT: u32 = 480;
/// Largest synthesized resolution (8K UHD).
const STUB_MAX_WIDTH: u32 = 7680;
const STUB_MAX_HEIGHT: u32 = 4320;

pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn open(video_ref: &Path) -> Result<Self> {
        let raw = video_ref.to_string_lossy();
        if !is_local_file_path(&raw) {
            return Err(anyhow!(
                "video sources must be local paths (no URL schemes): {}",
                raw
            ));
        }
        if let Some(rest) = raw.strip_prefix(STUB_SCHEME) {
            return Ok(Self {
                backend: FileBackend::Synthetic(SyntheticSource::parse(rest)?),
            });
        }
        if !video_ref.is_file() {
            return Err(anyhow!("video file not found: {}", video_ref.display()));
        }
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            Ok(Self {
                backend: FileBackend::Ffmpeg(FfmpegFileSource::open(video_ref)?),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(anyhow!(
                "decoding {} requires the ingest-file-ffmpeg feature",
                video_ref.display()
            ))
        }
    }
}

impl VideoSource for FileSource {
    fn info(&self) -> VideoInfo {
        match &self.backend {
            FileBackend::Synthetic(source) => source.info,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.info(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => Ok(source.next_frame()),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn skip_frame(&mut self) -> Result<bool> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => Ok(source.skip_frame()),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.skip_frame(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticSource {
    info: VideoInfo,
    position: u64,
}

impl SyntheticSource {
    /// Parses `name?frames=N&fps=F&width=W&height=H`. All parameters are optional.
    fn parse(rest: &str) -> Result<Self> {
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));
        let mut info = VideoInfo {
            total_frames: STUB_DEFAULT_FRAMES,
            fps: STUB_DEFAULT_FPS,
            width: STUB_DEFAULT_WIDTH,
            height: STUB_DEFAULT_HEIGHT,
        };
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("stub parameter '{}' has no value", pair))?;
            let context = || format!("stub parameter {}={}", key, value);
            match key {
                "frames" => info.total_frames = value.parse().with_context(context)?,
                "fps" => info.fps = value.parse().with_context(context)?,
                "width" => info.width = value.parse().with_context(context)?,
                "height" => info.height = value.parse().with_context(context)?,
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }
        if !(info.fps > 0.0) {
            return Err(anyhow!("stub fps must be positive"));
        }
        if info.width == 0 || info.height == 0 {
            return Err(anyhow!("stub resolution must be non-zero"));
        }
        if info.width > STUB_MAX_WIDTH || info.height > STUB_MAX_HEIGHT {
            return Err(anyhow!(
                "stub resolution {}x{} exceeds {}x{}",
                info.width,
                info.height,
                STUB_MAX_WIDTH,
                STUB_MAX_HEIGHT
            ));
        }
        (info.width, info.height) = processing_size(info.width, info.height);
        log::debug!(
            "synthetic source '{}': {} frames at {} fps, {}x{}",
            name,
            info.total_frames,
            info.fps,
            info.width,
            info.height
        );
        Ok(Self { info, position: 0 })
    }

    fn next_frame(&mut self) -> Option<Frame> {
        if !self.skip_frame() {
            return None;
        }
        let (width, height) = (self.info.width, self.info.height);
        let len = width as usize * height as usize * 3;
        let shade = (self.position % 256) as u8;
        Some(Frame::new(vec![shade; len], self.position, width, height))
    }

    fn skip_frame(&mut self) -> bool {
        if self.position >= self.info.total_frames {
            return false;
        }
        self.position += 1;
        true
    }
}

/// True for local paths and `stub://` references.
pub fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with(STUB_SCHEME) {
        return true;
    }
    !path.contains("://")
}
