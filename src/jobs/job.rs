use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{InputError, JobError};
use crate::ingest::file::STUB_SCHEME;
use crate::pipeline::AnalysisSettings;
use crate::storage::ResultRef;

/// Job identifier. Random v4 UUIDs, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to analyse and how.
#[derive(Clone, Debug, PartialEq)]
pub struct JobRequest {
    /// Local path or `stub://` reference.
    pub video_ref: PathBuf,
    pub settings: AnalysisSettings,
}

impl JobRequest {
    pub fn new(video_ref: impl Into<PathBuf>, settings: AnalysisSettings) -> Self {
        Self {
            video_ref: video_ref.into(),
            settings,
        }
    }

    pub fn validate(&self) -> Result<(), InputError> {
        let raw = self.video_ref.to_string_lossy();
        if raw.trim().is_empty() {
            return Err(InputError::EmptyFilename);
        }
        if !raw.starts_with(STUB_SCHEME) && !self.video_ref.is_file() {
            return Err(InputError::VideoNotFound(raw.into_owned()));
        }
        let conf = self.settings.conf_threshold;
        if !(conf > 0.0 && conf <= 1.0) {
            return Err(InputError::ConfidenceOutOfRange(conf));
        }
        if self.settings.frame_skip == 0 {
            return Err(InputError::ZeroFrameSkip);
        }
        let mut names = HashSet::new();
        for region in &self.settings.regions {
            if !names.insert(region.name()) {
                return Err(InputError::DuplicateRegion(region.name().to_string()));
            }
        }
        Ok(())
    }

    /// True when the video is a real file the job may delete on cleanup.
    pub fn owns_local_file(&self) -> bool {
        !self.video_ref.to_string_lossy().starts_with(STUB_SCHEME)
    }
}

/// Job record. Mutations produce a new record; the manager swaps it in whole.
#[derive(Clone, Debug)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// Percent complete, 0 to 100, unrounded.
    pub progress: f32,
    pub created_at: DateTime<Utc>,
    pub request: JobRequest,
    pub result_ref: Option<ResultRef>,
    pub error: Option<String>,
    pub cancel_requested: bool,
}

impl Job {
    pub(crate) fn new(id: JobId, request: JobRequest, status: JobStatus) -> Self {
        Self {
            id,
            status,
            progress: 0.0,
            created_at: Utc::now(),
            request,
            result_ref: None,
            error: None,
            cancel_requested: false,
        }
    }

    pub fn video_ref(&self) -> &Path {
        &self.request.video_ref
    }

    fn transition(&self, to: JobStatus) -> Result<Job, JobError> {
        let legal = matches!(
            (self.status, to),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        );
        if !legal {
            return Err(JobError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        let mut next = self.clone();
        next.status = to;
        Ok(next)
    }

    pub(crate) fn admitted(&self) -> Result<Job, JobError> {
        self.transition(JobStatus::Processing)
    }

    pub(crate) fn completed(&self, result_ref: ResultRef) -> Result<Job, JobError> {
        let mut next = self.transition(JobStatus::Completed)?;
        next.progress = 100.0;
        next.result_ref = Some(result_ref);
        Ok(next)
    }

    pub(crate) fn failed(&self, error: String) -> Result<Job, JobError> {
        let mut next = self.transition(JobStatus::Failed)?;
        next.error = Some(error);
        Ok(next)
    }

    /// Returns `None` when the progress value would not change.
    pub(crate) fn with_progress(&self, processed: u64, total: u64) -> Result<Option<Job>, JobError> {
        if self.status != JobStatus::Processing {
            return Err(JobError::NotProcessing {
                id: self.id,
                status: self.status,
            });
        }
        if total == 0 {
            return Ok(None);
        }
        let percent = (processed as f64 / total as f64 * 100.0).min(100.0) as f32;
        if percent <= self.progress {
            return Ok(None);
        }
        let mut next = self.clone();
        next.progress = percent;
        Ok(Some(next))
    }

    pub(crate) fn with_cancel_requested(&self) -> Job {
        let mut next = self.clone();
        next.cancel_requested = true;
        next
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            status: self.status,
            progress: self.progress,
            error: self.error.clone(),
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            status: self.status,
            progress: self.progress,
            created_at: self.created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobStatusView {
    pub status: JobStatus,
    pub progress: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobSummary {
    #[serde(rename = "job_id")]
    pub id: JobId,
    pub status: JobStatus,
    pub progress: f32,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{Point, Region};

    fn request(video: &str) -> JobRequest {
        JobRequest::new(
            video,
            AnalysisSettings {
                regions: Vec::new(),
                conf_threshold: 0.5,
                frame_skip: 1,
            },
        )
    }

    fn job(status: JobStatus) -> Job {
        Job::new(JobId::generate(), request("stub://clip"), status)
    }

    #[test]
    fn id_round_trips_through_text() {
        let id = JobId::generate();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Processing).unwrap(),
            "\"processing\""
        );
        assert_eq!(JobStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn terminal_states_do_not_move() {
        let done = job(JobStatus::Processing)
            .completed(ResultRef::new("r"))
            .unwrap();
        assert_eq!(done.progress, 100.0);
        assert!(matches!(
            done.failed("late".into()),
            Err(JobError::InvalidTransition { .. })
        ));
        let failed = job(JobStatus::Processing).failed("boom".into()).unwrap();
        assert!(failed.completed(ResultRef::new("r")).is_err());
        assert!(job(JobStatus::Queued).completed(ResultRef::new("r")).is_err());
        assert!(job(JobStatus::Processing).admitted().is_err());
    }

    #[test]
    fn progress_is_monotonic_and_clamped() {
        let running = job(JobStatus::Processing);
        let half = running.with_progress(50, 100).unwrap().unwrap();
        assert_eq!(half.progress, 50.0);
        assert!(half.with_progress(10, 100).unwrap().is_none());
        assert!(half.with_progress(50, 100).unwrap().is_none());
        assert!(half.with_progress(5, 0).unwrap().is_none());
        assert_eq!(half.with_progress(500, 100).unwrap().unwrap().progress, 100.0);
        assert!(matches!(
            job(JobStatus::Queued).with_progress(1, 2),
            Err(JobError::NotProcessing { .. })
        ));
    }

    #[test]
    fn progress_keeps_fractional_percent() {
        let third = job(JobStatus::Processing)
            .with_progress(1, 3)
            .unwrap()
            .unwrap();
        assert!((third.progress - 100.0 / 3.0).abs() < 1e-4, "{}", third.progress);
        let two_thirds = third.with_progress(2, 3).unwrap().unwrap();
        assert!(two_thirds.progress > 66.6 && two_thirds.progress < 66.7);
        assert!(two_thirds.with_progress(1, 3).unwrap().is_none());
    }

    #[test]
    fn request_validation() {
        assert!(request("stub://clip").validate().is_ok());
        assert_eq!(request("").validate(), Err(InputError::EmptyFilename));
        assert!(matches!(
            request("/no/such/video.mp4").validate(),
            Err(InputError::VideoNotFound(_))
        ));

        let mut bad = request("stub://clip");
        bad.settings.conf_threshold = 0.0;
        assert_eq!(bad.validate(), Err(InputError::ConfidenceOutOfRange(0.0)));
        bad.settings.conf_threshold = f32::NAN;
        assert!(bad.validate().is_err());
        bad.settings.conf_threshold = 1.0;
        bad.settings.frame_skip = 0;
        assert_eq!(bad.validate(), Err(InputError::ZeroFrameSkip));

        let square = vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
        ];
        let mut dup = request("stub://clip");
        dup.settings.regions = vec![
            Region::new("a", square.clone()).unwrap(),
            Region::new("a", square).unwrap(),
        ];
        assert_eq!(dup.validate(), Err(InputError::DuplicateRegion("a".into())));
    }
}
