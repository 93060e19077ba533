//! Replay backend.
//!
//! Plays back tracker output recorded elsewhere (one JSON object per line,
//! keyed by 1-based frame index). This is how the service runs without a
//! model in the process, and how tests drive the pipeline deterministically.
//!
//! An optional `video` line records the geometry the tracker saw. With it,
//! a video that cannot be decoded in-process is stepped through frame by
//! frame without pixels.
//!
//! ```text
//! {"video": {"total_frames": 120, "fps": 25.0, "width": 640, "height": 480}}
//! {"frame": 10, "detections": [{"track_id": 4, "class_id": 2, "confidence": 0.91, "bbox": [10, 20, 60, 80]}]}
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::detect::backend::{DetectorFactory, TrackingDetector};
use crate::detect::result::RawDetection;
use crate::frame::Frame;
use crate::ingest::VideoInfo;

/// Suffix appended to a video path to find its recorded tracks.
pub const SIDECAR_SUFFIX: &str = ".tracks.jsonl";

#[derive(Deserialize)]
#[serde(untagged)]
enum ScriptLine {
    Frame {
        frame: u64,
        #[serde(default)]
        detections: Vec<RawDetection>,
    },
    Video {
        video: VideoInfo,
    },
}

/// Recorded tracker output, by frame index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackScript {
    frames: BTreeMap<u64, Vec<RawDetection>>,
    video: Option<VideoInfo>,
}

impl TrackScript {
    /// Parses JSONL. Blank lines and `#` comments are skipped; repeated
    /// frame indices are merged. At most one `video` line is allowed.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut script = Self::default();
        for (idx, line) in raw.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parsed: ScriptLine = serde_json::from_str(line)
                .with_context(|| format!("track script line {}", line_no))?;
            match parsed {
                ScriptLine::Frame { frame: 0, .. } => {
                    return Err(anyhow!(
                        "track script line {}: frame indices are 1-based",
                        line_no
                    ));
                }
                ScriptLine::Frame { frame, detections } => script.push(frame, detections),
                ScriptLine::Video { video } => {
                    if script.video.is_some() {
                        return Err(anyhow!(
                            "track script line {}: duplicate video line",
                            line_no
                        ));
                    }
                    if !(video.fps > 0.0) || video.width == 0 || video.height == 0 {
                        return Err(anyhow!(
                            "track script line {}: video needs positive fps and size",
                            line_no
                        ));
                    }
                    script.video = Some(video);
                }
            }
        }
        let last_frame = script.last_frame();
        if let Some(video) = script.video.as_mut() {
            // unknown length: play until the last recorded frame
            if video.total_frames == 0 {
                video.total_frames = last_frame;
            }
        }
        Ok(script)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read track script {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parse track script {}", path.display()))
    }

    /// Adds detections for a frame.
    pub fn push(&mut self, frame: u64, detections: Vec<RawDetection>) {
        self.frames.entry(frame).or_default().extend(detections);
    }

    pub fn detections(&self, frame: u64) -> &[RawDetection] {
        self.frames.get(&frame).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Highest frame index with an entry, 0 when empty.
    pub fn last_frame(&self) -> u64 {
        self.frames.keys().next_back().copied().unwrap_or(0)
    }

    /// Geometry from the `video` line, if the script has one.
    pub fn video_info(&self) -> Option<VideoInfo> {
        self.video
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Sidecar path for a video reference.
pub fn sidecar_path(video_ref: &Path) -> PathBuf {
    let mut raw = video_ref.as_os_str().to_os_string();
    raw.push(SIDECAR_SUFFIX);
    PathBuf::from(raw)
}

pub struct ReplayDetector {
    script: Arc<TrackScript>,
}

impl ReplayDetector {
    pub fn new(script: Arc<TrackScript>) -> Self {
        Self { script }
    }
}

impl TrackingDetector for ReplayDetector {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn timeline(&self) -> Option<VideoInfo> {
        self.script.video_info()
    }

    fn track(&mut self, frame: &Frame, conf_threshold: f32) -> Result<Vec<RawDetection>> {
        Ok(self
            .script
            .detections(frame.index)
            .iter()
            .filter(|d| d.confidence >= conf_threshold)
            .cloned()
            .collect())
    }
}

enum ScriptSource {
    Sidecar,
    File(PathBuf),
    Loaded(Arc<TrackScript>),
}

/// Creates replay detectors.
///
/// By default the script is read from `<video>.tracks.jsonl` when the job
/// starts. A fixed file or an in-memory script may be used instead.
pub struct ReplayFactory {
    source: ScriptSource,
}

impl ReplayFactory {
    pub fn sidecar() -> Self {
        Self {
            source: ScriptSource::Sidecar,
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: ScriptSource::File(path.into()),
        }
    }

    pub fn from_script(script: TrackScript) -> Self {
        Self {
            source: ScriptSource::Loaded(Arc::new(script)),
        }
    }
}

impl Default for ReplayFactory {
    fn default() -> Self {
        Self::sidecar()
    }
}

impl DetectorFactory for ReplayFactory {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn create(&self, video_ref: &Path) -> Result<Box<dyn TrackingDetector>> {
        let script = match &self.source {
            ScriptSource::Loaded(script) => Arc::clone(script),
            ScriptSource::File(path) => Arc::new(TrackScript::from_path(path)?),
            ScriptSource::Sidecar => {
                let path = sidecar_path(video_ref);
                if !path.is_file() {
                    return Err(anyhow!(
                        "no recorded tracks for {} (expected {})",
                        video_ref.display(),
                        path.display()
                    ));
                }
                Arc::new(TrackScript::from_path(&path)?)
            }
        };
        log::debug!(
            "replay detector for {} covers {} frames",
            video_ref.display(),
            script.frame_count()
        );
        Ok(Box::new(ReplayDetector::new(script)))
    }
}
