//! DataTrack
//!
//! Counts vehicles in recorded video. A job takes a video, a set of polygon
//! regions and sampling parameters; a worker feeds sampled frames through a
//! detector/tracker and folds the tracked detections into per-type and
//! per-region counts. Results are stored as JSON and can be exported as CSV.
//!
//! # Counting semantics
//!
//! Two figures are reported everywhere:
//!
//! - **instances**: every qualifying detection on every analysed frame
//! - **unique**: distinct tracker ids
//!
//! A detection qualifies when its class is a vehicle (car, motorcycle, bus,
//! truck), it carries a non-negative track id, and its confidence meets the
//! job threshold. A detection lands in a region when the center of its box
//! is inside the polygon. Regions may overlap; each counts independently.
//!
//! # Module Structure
//!
//! - `hardware`: hardware facts to tuning profile
//! - `region`: polygon regions and point-in-polygon
//! - `aggregate`: the counting state machine
//! - `detect`: detector/tracker backends and registry
//! - `ingest`: video sources (`stub://` and FFmpeg files)
//! - `pipeline`: frame sampling loop producing an `AnalysisResult`
//! - `jobs`: job table and bounded worker pool
//! - `storage`, `upload`, `export`: result files, uploaded videos, CSV
//! - `api`, `config`: HTTP control surface for `datatrackd`

pub mod aggregate;
pub mod api;
pub mod config;
pub mod detect;
pub mod error;
pub mod export;
pub mod frame;
pub mod hardware;
pub mod ingest;
pub mod jobs;
pub mod pipeline;
pub mod region;
pub mod storage;
pub mod upload;

pub use aggregate::{CountSnapshot, RegionCounts, TrackAggregator};
pub use config::DatatrackConfig;
pub use detect::{
    builtin_registry, DetectionEvent, DetectorFactory, DetectorRegistry, RawDetection,
    TrackingDetector, VehicleType,
};
pub use error::{ErrorKind, InputError, JobError, ProcessingError, UploadError};
pub use hardware::{classify, DeviceClass, HardwareFacts, HardwareInfo, HardwareProfile};
pub use ingest::{open_video, open_video_or_timeline, VideoInfo, VideoSource};
pub use jobs::{JobId, JobManager, JobRequest, JobRunner, JobStatus, VideoRunner};
pub use pipeline::{analyze, AnalysisResult, AnalysisSettings};
pub use region::{build_regions, Point, Region, RegionSpec};
pub use storage::{FilesystemResultStore, InMemoryResultStore, ResultRef, ResultStore};
pub use upload::{StoredTracks, StoredUpload, UploadStore};
