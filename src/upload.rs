//! Upload store for videos submitted over the API.
//!
//! Uploads are streamed straight to disk under a unique name
//! (`<uuid>_<sanitized original name>`) and never buffered whole in memory.
//! Recorded tracks for a stored video land next to it as
//! `<stored name>.tracks.jsonl`, where the replay detector looks for them.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use uuid::Uuid;

use crate::detect::backends::replay::{sidecar_path, TrackScript};
use crate::error::{InputError, UploadError};
use crate::ingest::file::STUB_SCHEME;
use crate::ingest::VideoInfo;

pub const ALLOWED_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mov", "mkv"];

/// Default upload limit (2000 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 2000 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoredUpload {
    /// Name to pass back as `filename` when submitting a job.
    pub filename: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub bytes: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoredTracks {
    /// Sidecar name, `<video>.tracks.jsonl`.
    pub filename: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub bytes: u64,
    /// Frames with at least one recorded entry.
    pub frames: usize,
    /// Geometry from the script's `video` line.
    pub video_info: Option<VideoInfo>,
}

pub struct UploadStore {
    dir: PathBuf,
    max_bytes: u64,
}

impl UploadStore {
    pub fn open(dir: impl Into<PathBuf>, max_bytes: u64) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create upload dir {}", dir.display()))?;
        Ok(Self { dir, max_bytes })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Streams `body` into the store. `declared_len` (e.g. Content-Length)
    /// lets oversized uploads be refused before reading anything.
    pub fn save(
        &self,
        original_name: &str,
        body: &mut dyn Read,
        declared_len: Option<u64>,
    ) -> Result<StoredUpload, UploadError> {
        check_extension(original_name)?;
        let sanitized = secure_filename(original_name);
        if sanitized.is_empty() {
            return Err(InputError::EmptyFilename.into());
        }
        if declared_len.is_some_and(|len| len > self.max_bytes) {
            return Err(InputError::TooLarge {
                limit: self.max_bytes,
            }
            .into());
        }

        let filename = format!("{}_{}", Uuid::new_v4(), sanitized);
        let path = self.dir.join(&filename);
        let partial = self.dir.join(format!(".{}.part", filename));

        let written = match copy_limited(body, &partial, self.max_bytes) {
            Ok(n) => n,
            Err(err) => {
                let _ = std::fs::remove_file(&partial);
                return Err(err);
            }
        };
        if written == 0 {
            let _ = std::fs::remove_file(&partial);
            return Err(InputError::MissingFile.into());
        }
        if let Err(err) = std::fs::rename(&partial, &path) {
            let _ = std::fs::remove_file(&partial);
            return Err(err.into());
        }
        log::info!("stored upload {} ({} bytes)", filename, written);
        Ok(StoredUpload {
            filename,
            path,
            bytes: written,
        })
    }

    /// Stores recorded tracker output for an already uploaded video,
    /// replacing any earlier tracks. The body must parse as a track script.
    pub fn save_tracks(
        &self,
        video_name: &str,
        body: &mut dyn Read,
        declared_len: Option<u64>,
    ) -> Result<StoredTracks, UploadError> {
        check_extension(video_name)?;
        let video = self.resolve(video_name)?;
        if declared_len.is_some_and(|len| len > self.max_bytes) {
            return Err(InputError::TooLarge {
                limit: self.max_bytes,
            }
            .into());
        }
        let path = sidecar_path(&video);
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let partial = self.dir.join(format!(".{}.part", filename));

        let written = match copy_limited(body, &partial, self.max_bytes) {
            Ok(n) => n,
            Err(err) => {
                let _ = std::fs::remove_file(&partial);
                return Err(err);
            }
        };
        if written == 0 {
            let _ = std::fs::remove_file(&partial);
            return Err(InputError::MissingFile.into());
        }
        let parsed = std::fs::read_to_string(&partial)
            .map_err(anyhow::Error::from)
            .and_then(|raw| TrackScript::parse(&raw));
        let script = match parsed {
            Ok(script) => script,
            Err(err) => {
                let _ = std::fs::remove_file(&partial);
                return Err(InputError::Malformed(format!("{err:#}")).into());
            }
        };
        if let Err(err) = std::fs::rename(&partial, &path) {
            let _ = std::fs::remove_file(&partial);
            return Err(err.into());
        }
        log::info!(
            "stored tracks {} ({} bytes, {} frames)",
            filename,
            written,
            script.frame_count()
        );
        Ok(StoredTracks {
            filename,
            path,
            bytes: written,
            frames: script.frame_count(),
            video_info: script.video_info(),
        })
    }

    /// Maps a submitted filename to a stored video. Only files in the
    /// upload dir resolve; `stub://` and other schemes are refused.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf, InputError> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(InputError::EmptyFilename);
        }
        if filename.starts_with(STUB_SCHEME) || filename.contains("://") {
            return Err(InputError::NotAnUpload(filename.to_string()));
        }
        let sanitized = secure_filename(filename);
        if sanitized.is_empty() {
            return Err(InputError::EmptyFilename);
        }
        let path = self.dir.join(&sanitized);
        if !path.is_file() {
            return Err(InputError::VideoNotFound(filename.to_string()));
        }
        Ok(path)
    }
}

fn copy_limited(body: &mut dyn Read, dest: &Path, max_bytes: u64) -> Result<u64, UploadError> {
    let mut file = File::create(dest)?;
    let mut limited = body.take(max_bytes.saturating_add(1));
    let written = io::copy(&mut limited, &mut file)?;
    if written > max_bytes {
        return Err(InputError::TooLarge { limit: max_bytes }.into());
    }
    file.flush()?;
    file.sync_all()?;
    Ok(written)
}

fn check_extension(name: &str) -> Result<(), InputError> {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(())
    } else {
        Err(InputError::UnsupportedFormat(ext))
    }
}

/// Reduces a client-supplied name to a safe single path component:
/// ASCII letters, digits, `_`, `.` and `-`, whitespace collapsed to `_`,
/// no leading dots or underscores.
pub fn secure_filename(name: &str) -> String {
    let spaced = name.replace(['/', '\\'], " ");
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    kept.trim_start_matches(['.', '_']).to_string()
}
