//! Error taxonomy.
//!
//! Query and submission paths return typed errors so callers can tell
//! "unknown job" apart from "job not finished yet". Collaborator adapters
//! (video decode, detector backends, config) use `anyhow` and are folded into
//! [`ProcessingError`] by the worker.

use thiserror::Error;

use crate::aggregate::AggregateError;
use crate::jobs::{JobId, JobStatus};

/// Coarse classification used by the request layer to pick a response code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    NotFound,
    NotReady,
    Conflict,
    Internal,
}

/// Rejected submissions. Raised synchronously, never stored on a job.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InputError {
    #[error("no video file provided")]
    MissingFile,
    #[error("empty filename")]
    EmptyFilename,
    #[error("invalid file type '{0}' (allowed: mp4, avi, mov, mkv)")]
    UnsupportedFormat(String),
    #[error("video '{0}' not found")]
    VideoNotFound(String),
    #[error("'{0}' is not an uploaded video")]
    NotAnUpload(String),
    #[error("upload exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
    #[error("region '{region}' needs at least 3 vertices, got {got}")]
    RegionTooSmall { region: String, got: usize },
    #[error("region '{0}' has a non-finite vertex")]
    RegionNotFinite(String),
    #[error("duplicate region name '{0}'")]
    DuplicateRegion(String),
    #[error("confidence threshold must be within (0, 1], got {0}")]
    ConfidenceOutOfRange(f32),
    #[error("frame skip must be at least 1")]
    ZeroFrameSkip,
    #[error("malformed request: {0}")]
    Malformed(String),
}

impl InputError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InputError::VideoNotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Input,
        }
    }
}

/// Errors surfaced by [`crate::jobs::JobManager`] operations.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("results for job {0} not found")]
    ResultMissing(JobId),
    #[error("job {id} is not ready (status: {status})")]
    NotReady { id: JobId, status: JobStatus },
    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("job {id} is not processing (status: {status})")]
    NotProcessing { id: JobId, status: JobStatus },
    #[error("result store failure: {0:#}")]
    Store(anyhow::Error),
    #[error("failed to start worker: {0}")]
    Spawn(#[from] std::io::Error),
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Input(err) => err.kind(),
            JobError::NotFound(_) | JobError::ResultMissing(_) => ErrorKind::NotFound,
            JobError::NotReady { .. } => ErrorKind::NotReady,
            JobError::InvalidTransition { .. } | JobError::NotProcessing { .. } => {
                ErrorKind::Conflict
            }
            JobError::Store(_) | JobError::Spawn(_) => ErrorKind::Internal,
        }
    }
}

/// Failures inside a job run. Captured as the job's error detail.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error("video decode failed: {0}")]
    Decode(String),
    #[error("detector failed at frame {frame}: {message}")]
    Detector { frame: u64, message: String },
    #[error("cancelled after {frames_processed} frames")]
    Cancelled { frames_processed: u64 },
    #[error("worker panicked: {0}")]
    Panicked(String),
}

impl ProcessingError {
    pub fn decode(err: anyhow::Error) -> Self {
        ProcessingError::Decode(format!("{err:#}"))
    }

    pub fn detector(frame: u64, err: anyhow::Error) -> Self {
        ProcessingError::Detector {
            frame,
            message: format!("{err:#}"),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessingError::Cancelled { .. })
    }
}

/// Upload failures: bad input, or the upload dir could not be written.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("upload storage failure: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::Input(err) => err.kind(),
            UploadError::Io(_) => ErrorKind::Internal,
        }
    }
}
