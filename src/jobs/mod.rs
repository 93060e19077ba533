//! Job table and bounded worker pool.
//!
//! Lifecycle: `Queued -> Processing -> {Completed | Failed}`. Terminal states
//! never change. Only the worker that owns a job id drives its transitions.
//!
//! Admission is decided under the scheduler lock: with a free slot the job is
//! inserted as Processing and a named worker thread starts; otherwise it is
//! inserted as Queued and waits in FIFO order. A worker that finishes a job
//! takes the next queued one before exiting, so at most `capacity` workers
//! exist at any time.
//!
//! Lock order is scheduler, then table. Records are `Arc<Job>` and every
//! mutation swaps in a new record, so readers only ever see whole records.

mod job;
mod runner;

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;

use chrono::Local;
use log::{error, info, warn};

use crate::detect::backends::replay::sidecar_path;
use crate::error::{JobError, ProcessingError};
use crate::export::render_csv;
use crate::hardware::HardwareProfile;
use crate::pipeline::AnalysisResult;
use crate::storage::ResultStore;

pub use job::{Job, JobId, JobRequest, JobStatus, JobStatusView, JobSummary};
pub use runner::{JobContext, JobRunner, VideoRunner};

struct JobSlot {
    record: Arc<Job>,
    cancel: Arc<AtomicBool>,
}

#[derive(Default)]
struct Scheduler {
    running: usize,
    waiting: VecDeque<JobId>,
}

struct Inner {
    capacity: usize,
    runner: Arc<dyn JobRunner>,
    results: Arc<dyn ResultStore>,
    profile: Option<HardwareProfile>,
    scheduler: Mutex<Scheduler>,
    table: RwLock<HashMap<JobId, JobSlot>>,
}

/// Shared handle to the job table. Clones refer to the same jobs.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    /// `capacity` is the maximum number of concurrently processing jobs
    /// (at least 1).
    pub fn new(capacity: usize, runner: Arc<dyn JobRunner>, results: Arc<dyn ResultStore>) -> Self {
        Self::build(capacity, runner, results, None)
    }

    /// Pool sized from a hardware profile.
    pub fn from_profile(
        profile: HardwareProfile,
        runner: Arc<dyn JobRunner>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        Self::build(profile.worker_count, runner, results, Some(profile))
    }

    /// Hardware profile kept for reporting, with an explicit pool size.
    pub fn with_capacity_override(
        profile: HardwareProfile,
        capacity: usize,
        runner: Arc<dyn JobRunner>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        Self::build(capacity, runner, results, Some(profile))
    }

    fn build(
        capacity: usize,
        runner: Arc<dyn JobRunner>,
        results: Arc<dyn ResultStore>,
        profile: Option<HardwareProfile>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: capacity.max(1),
                runner,
                results,
                profile,
                scheduler: Mutex::new(Scheduler::default()),
                table: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn hardware_profile(&self) -> Option<&HardwareProfile> {
        self.inner.profile.as_ref()
    }

    /// Validates and registers a job. Never waits for processing.
    pub fn create_job(&self, request: JobRequest) -> Result<JobId, JobError> {
        request.validate()?;
        let id = JobId::generate();
        let video = request.video_ref.display().to_string();

        let mut scheduler = self.inner.scheduler();
        let admit = scheduler.running < self.inner.capacity;
        let status = if admit {
            JobStatus::Processing
        } else {
            JobStatus::Queued
        };
        self.inner.table_mut().insert(
            id,
            JobSlot {
                record: Arc::new(Job::new(id, request, status)),
                cancel: Arc::new(AtomicBool::new(false)),
            },
        );
        if !admit {
            scheduler.waiting.push_back(id);
            info!("job {} queued ({} waiting): {}", id, scheduler.waiting.len(), video);
            return Ok(id);
        }
        scheduler.running += 1;
        drop(scheduler);

        if let Err(err) = self.spawn_worker(id) {
            self.inner.scheduler().running -= 1;
            self.inner.table_mut().remove(&id);
            error!("job {}: worker did not start: {}", id, err);
            return Err(JobError::Spawn(err));
        }
        info!("job {} processing: {}", id, video);
        Ok(id)
    }

    /// Records progress as `processed / total`, clamped and never decreasing.
    /// A zero `total` leaves progress unchanged.
    pub fn report_progress(&self, id: JobId, processed: u64, total: u64) -> Result<(), JobError> {
        let mut table = self.inner.table_mut();
        let slot = table.get_mut(&id).ok_or(JobError::NotFound(id))?;
        if let Some(next) = slot.record.with_progress(processed, total)? {
            slot.record = Arc::new(next);
        }
        Ok(())
    }

    /// Stores the result and marks the job Completed.
    pub fn complete(&self, id: JobId, result: &AnalysisResult) -> Result<(), JobError> {
        // Check first so an illegal call does not leave an artifact behind.
        let status = self.record(id)?.status;
        if status != JobStatus::Processing {
            return Err(JobError::InvalidTransition {
                id,
                from: status,
                to: JobStatus::Completed,
            });
        }

        let result_ref = self.inner.results.save(id, result).map_err(JobError::Store)?;

        let mut table = self.inner.table_mut();
        let transitioned = match table.get_mut(&id) {
            Some(slot) => slot.record.completed(result_ref.clone()).map(|next| {
                slot.record = Arc::new(next);
            }),
            None => Err(JobError::NotFound(id)),
        };
        drop(table);

        if transitioned.is_err() {
            if let Err(err) = self.inner.results.remove(&result_ref) {
                warn!("job {}: orphaned result {} not removed: {:#}", id, result_ref, err);
            }
        }
        transitioned
    }

    /// Marks the job Failed with an error detail.
    pub fn fail(&self, id: JobId, detail: impl Into<String>) -> Result<(), JobError> {
        let mut table = self.inner.table_mut();
        let slot = table.get_mut(&id).ok_or(JobError::NotFound(id))?;
        slot.record = Arc::new(slot.record.failed(detail.into())?);
        Ok(())
    }

    pub fn status(&self, id: JobId) -> Result<JobStatusView, JobError> {
        Ok(self.record(id)?.status_view())
    }

    /// Point-in-time copy of a job record.
    pub fn job(&self, id: JobId) -> Result<Job, JobError> {
        Ok(self.record(id)?.as_ref().clone())
    }

    pub fn result(&self, id: JobId) -> Result<AnalysisResult, JobError> {
        let record = self.record(id)?;
        if record.status != JobStatus::Completed {
            return Err(JobError::NotReady {
                id,
                status: record.status,
            });
        }
        let result_ref = record
            .result_ref
            .as_ref()
            .ok_or(JobError::ResultMissing(id))?;
        self.inner
            .results
            .load(result_ref)
            .map_err(JobError::Store)?
            .ok_or(JobError::ResultMissing(id))
    }

    /// CSV report for a completed job, stamped with the local time.
    pub fn export_csv(&self, id: JobId) -> Result<String, JobError> {
        let result = self.result(id)?;
        Ok(render_csv(&result, Local::now().naive_local()))
    }

    /// Removes a job. A running worker is told to stop; the video, its
    /// recorded tracks and the result are deleted on a best-effort basis.
    pub fn cleanup(&self, id: JobId) -> Result<(), JobError> {
        // The record goes first: a worker finishing after this point finds
        // no record and discards its own artifact.
        let slot = self
            .inner
            .table_mut()
            .remove(&id)
            .ok_or(JobError::NotFound(id))?;
        slot.cancel.store(true, Ordering::Release);

        let record = slot.record;
        if record.request.owns_local_file() {
            let video = record.video_ref();
            for path in [video.to_path_buf(), sidecar_path(video)] {
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => warn!("job {}: could not delete {}: {}", id, path.display(), err),
                }
            }
        }
        if let Some(result_ref) = &record.result_ref {
            if let Err(err) = self.inner.results.remove(result_ref) {
                warn!("job {}: could not delete result {}: {:#}", id, result_ref, err);
            }
        }
        info!("job {} cleaned up (was {})", id, record.status);
        Ok(())
    }

    /// Asks a queued or running job to stop. Terminal jobs are left alone.
    pub fn cancel(&self, id: JobId) -> Result<JobStatus, JobError> {
        let mut table = self.inner.table_mut();
        let slot = table.get_mut(&id).ok_or(JobError::NotFound(id))?;
        let status = slot.record.status;
        if status.is_terminal() || slot.record.cancel_requested {
            return Ok(status);
        }
        slot.cancel.store(true, Ordering::Release);
        slot.record = Arc::new(slot.record.with_cancel_requested());
        info!("job {}: cancellation requested ({})", id, status);
        Ok(status)
    }

    /// All jobs, oldest first.
    pub fn list_jobs(&self) -> Vec<JobSummary> {
        let mut jobs: Vec<JobSummary> = self
            .inner
            .table()
            .values()
            .map(|slot| slot.record.summary())
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs
    }

    fn record(&self, id: JobId) -> Result<Arc<Job>, JobError> {
        self.inner
            .table()
            .get(&id)
            .map(|slot| Arc::clone(&slot.record))
            .ok_or(JobError::NotFound(id))
    }

    fn spawn_worker(&self, first: JobId) -> std::io::Result<()> {
        let manager = self.clone();
        thread::Builder::new()
            .name(format!("datatrack-job-{}", short_id(first)))
            .spawn(move || manager.worker_loop(first))
            .map(|_| ())
    }

    fn worker_loop(&self, first: JobId) {
        let mut next = Some(first);
        while let Some(id) = next {
            self.run_one(id);
            next = self.admit_next();
        }
    }

    /// Pops the next queued job and marks it Processing, or releases the
    /// worker slot when nothing is waiting.
    fn admit_next(&self) -> Option<JobId> {
        let mut scheduler = self.inner.scheduler();
        while let Some(id) = scheduler.waiting.pop_front() {
            let mut table = self.inner.table_mut();
            // cleaned up while queued
            let Some(slot) = table.get_mut(&id) else {
                continue;
            };
            match slot.record.admitted() {
                Ok(next) => {
                    slot.record = Arc::new(next);
                    return Some(id);
                }
                Err(err) => warn!("job {}: not admitted: {}", id, err),
            }
        }
        scheduler.running -= 1;
        None
    }

    fn run_one(&self, id: JobId) {
        let Some((request, cancel)) = self
            .inner
            .table()
            .get(&id)
            .map(|slot| (slot.record.request.clone(), Arc::clone(&slot.cancel)))
        else {
            return;
        };

        let outcome = if cancel.load(Ordering::Acquire) {
            Err(ProcessingError::Cancelled {
                frames_processed: 0,
            })
        } else {
            let mut ctx = JobContext::new(id, request, cancel, self.clone());
            let runner = Arc::clone(&self.inner.runner);
            catch_unwind(AssertUnwindSafe(|| runner.run(&mut ctx)))
                .unwrap_or_else(|payload| Err(ProcessingError::Panicked(panic_message(&*payload))))
        };

        match outcome {
            Ok(result) => match self.complete(id, &result) {
                Ok(()) => info!(
                    "job {} completed: {} unique vehicles over {} frames",
                    id, result.counts.total_vehicles, result.total_frames
                ),
                Err(JobError::NotFound(_)) => info!("job {} finished after cleanup", id),
                Err(err) => {
                    error!("job {}: result not recorded: {}", id, err);
                    self.record_failure(id, err.to_string());
                }
            },
            Err(err) => {
                if err.is_cancelled() {
                    info!("job {} {}", id, err);
                } else {
                    error!("job {} failed: {}", id, err);
                }
                self.record_failure(id, err.to_string());
            }
        }
    }

    fn record_failure(&self, id: JobId, detail: String) {
        match self.fail(id, detail) {
            Ok(()) | Err(JobError::NotFound(_)) => {}
            Err(err) => warn!("job {}: failure not recorded: {}", id, err),
        }
    }
}

impl Inner {
    fn scheduler(&self) -> MutexGuard<'_, Scheduler> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn table(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobSlot>> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn table_mut(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobSlot>> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn short_id(id: JobId) -> String {
    id.to_string().chars().take(8).collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
