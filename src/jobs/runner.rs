use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::detect::DetectorRegistry;
use crate::error::{JobError, ProcessingError};
use crate::ingest::open_video_or_timeline;
use crate::pipeline::{analyze, AnalysisObserver, AnalysisResult};

use super::{JobId, JobManager, JobRequest};

/// Executes one job on a worker thread.
///
/// The runner must not touch the job table directly; it reports through the
/// [`JobContext`] and returns the result, and the worker records the outcome.
pub trait JobRunner: Send + Sync {
    fn run(&self, ctx: &mut JobContext) -> Result<AnalysisResult, ProcessingError>;
}

/// Handle a runner gets for the job it is executing.
pub struct JobContext {
    id: JobId,
    request: JobRequest,
    cancel: Arc<AtomicBool>,
    manager: JobManager,
}

impl JobContext {
    pub(crate) fn new(
        id: JobId,
        request: JobRequest,
        cancel: Arc<AtomicBool>,
        manager: JobManager,
    ) -> Self {
        Self {
            id,
            request,
            cancel,
            manager,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn request(&self) -> &JobRequest {
        &self.request
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub fn report_progress(&self, processed: u64, total: u64) {
        match self.manager.report_progress(self.id, processed, total) {
            Ok(()) => {}
            // cleaned up underneath us; the worker notices on completion
            Err(JobError::NotFound(_)) => {}
            Err(err) => log::debug!("job {}: progress not recorded: {}", self.id, err),
        }
    }
}

impl AnalysisObserver for JobContext {
    fn progress(&mut self, processed: u64, total: u64) {
        self.report_progress(processed, total);
    }

    fn should_stop(&self) -> bool {
        self.is_cancelled()
    }
}

/// Runs the job's video through a detector from the registry. Videos this
/// build cannot decode play along the detector's recorded timeline, if any.
pub struct VideoRunner {
    detectors: DetectorRegistry,
    backend: Option<String>,
}

impl VideoRunner {
    /// Uses the registry's default backend.
    pub fn new(detectors: DetectorRegistry) -> Self {
        Self {
            detectors,
            backend: None,
        }
    }

    pub fn with_backend(detectors: DetectorRegistry, backend: impl Into<String>) -> Self {
        Self {
            detectors,
            backend: Some(backend.into()),
        }
    }
}

impl JobRunner for VideoRunner {
    fn run(&self, ctx: &mut JobContext) -> Result<AnalysisResult, ProcessingError> {
        let video_ref = ctx.request().video_ref.clone();
        let settings = ctx.request().settings.clone();
        let mut detector = self
            .detectors
            .create(self.backend.as_deref(), &video_ref)
            .map_err(|err| ProcessingError::detector(0, err))?;
        let mut source = open_video_or_timeline(&video_ref, detector.timeline())
            .map_err(ProcessingError::decode)?;
        log::info!(
            "job {}: analysing {} with {} (skip={}, conf={}, regions={})",
            ctx.id(),
            video_ref.display(),
            detector.name(),
            settings.frame_skip,
            settings.conf_threshold,
            settings.regions.len()
        );
        analyze(&mut *source, &mut *detector, &settings, ctx)
    }
}
