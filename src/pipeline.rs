//! Worker body: video frames in, count snapshot out.
//!
//! Frame `n` (1-based) is analysed iff `n % frame_skip == 0`. Skipped frames
//! are still advanced through the source so indices stay aligned with the
//! container. The observer is consulted at every sampled frame; that is where
//! progress is published and cancellation is honoured.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::aggregate::{CountSnapshot, TrackAggregator};
use crate::detect::{DetectionEvent, TrackingDetector};
use crate::error::ProcessingError;
use crate::ingest::VideoSource;
use crate::region::Region;

/// Parameters of one analysis run.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisSettings {
    pub regions: Vec<Region>,
    pub conf_threshold: f32,
    pub frame_skip: u32,
}

/// Persisted outcome of a completed job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub total_frames: u64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    #[serde(flatten)]
    pub counts: CountSnapshot,
}

/// Hooks for the worker that owns the run.
pub trait AnalysisObserver {
    /// `processed` frames of `total` have been decoded. `total` may be 0
    /// when the container does not report a frame count.
    fn progress(&mut self, _processed: u64, _total: u64) {}

    /// Checked between sampled frames.
    fn should_stop(&self) -> bool {
        false
    }
}

/// Observer that ignores progress and never stops.
pub struct Unobserved;

impl AnalysisObserver for Unobserved {}

pub fn analyze(
    source: &mut dyn VideoSource,
    detector: &mut dyn TrackingDetector,
    settings: &AnalysisSettings,
    observer: &mut dyn AnalysisObserver,
) -> Result<AnalysisResult, ProcessingError> {
    let video = source.info();
    let frame_skip = u64::from(settings.frame_skip.max(1));
    let mut aggregator = TrackAggregator::new(settings.regions.clone(), settings.conf_threshold);

    detector
        .warm_up()
        .map_err(|err| ProcessingError::detector(0, err))?;

    let mut decoded: u64 = 0;
    let mut sampled: u64 = 0;
    loop {
        let next_index = decoded + 1;
        if next_index % frame_skip != 0 {
            if !source.skip_frame().map_err(ProcessingError::decode)? {
                break;
            }
            decoded = next_index;
            continue;
        }

        if observer.should_stop() {
            let partial = aggregator.finalize();
            info!(
                "analysis stopped at frame {} ({} unique vehicles so far)",
                decoded, partial.total_vehicles
            );
            return Err(ProcessingError::Cancelled {
                frames_processed: decoded,
            });
        }

        let Some(frame) = source.next_frame().map_err(ProcessingError::decode)? else {
            break;
        };
        decoded = frame.index;
        let raw = detector
            .track(&frame, settings.conf_threshold)
            .map_err(|err| ProcessingError::detector(frame.index, err))?;
        let events: Vec<DetectionEvent> = raw
            .into_iter()
            .map(|r| DetectionEvent::from_raw(frame.index, r))
            .collect();
        debug!("frame {}: {} detections", frame.index, events.len());
        aggregator.ingest(frame.index, &events)?;
        sampled += 1;
        observer.progress(decoded, video.total_frames);
    }

    let counts = aggregator.finalize();
    let stats = aggregator.stats();
    info!(
        "analysed {} of {} frames: {} unique vehicles, {} detections dropped",
        sampled,
        decoded,
        counts.total_vehicles,
        stats.dropped()
    );
    observer.progress(decoded, video.total_frames);

    Ok(AnalysisResult {
        total_frames: if video.total_frames > 0 {
            video.total_frames
        } else {
            decoded
        },
        fps: video.fps,
        width: video.width,
        height: video.height,
        counts,
    })
}
