//! Detection aggregation.
//!
//! A [`TrackAggregator`] is created per analysis run and owned by exactly one
//! worker. It folds ordered per-frame detection batches into per-type
//! instance counts, deduplicated track counts, and per-region tallies, then
//! finalizes into an immutable [`CountSnapshot`].
//!
//! Counting rules:
//! - detections without a track id are dropped entirely (they cannot be
//!   deduplicated across frames);
//! - detections outside the vehicle taxonomy or under the confidence
//!   threshold are dropped;
//! - regions may overlap; each matching region counts the detection
//!   independently, while the global unique count stays a single set.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detect::{DetectionEvent, VehicleType};
use crate::region::Region;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AggregateError {
    #[error("frame index went backwards: {got} after {previous}")]
    StreamOrder { previous: u64, got: u64 },
    #[error("aggregator is finalized; no further detections accepted")]
    Finalized,
}

/// Per-region counts as published in results.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionCounts {
    pub count: u64,
    pub unique_count: u64,
    pub types: BTreeMap<VehicleType, u64>,
}

/// Final counts. Integers only; track id sets never leave the aggregator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSnapshot {
    pub total_vehicles: u64,
    /// Instance counts (every qualifying detection).
    pub vehicles_by_type: BTreeMap<VehicleType, u64>,
    /// Distinct track ids per type.
    pub vehicles_by_type_unique: BTreeMap<VehicleType, u64>,
    pub vehicles_by_region: BTreeMap<String, RegionCounts>,
}

/// Ingest bookkeeping, for logs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub batches: u64,
    pub accepted: u64,
    pub untracked: u64,
    pub foreign_class: u64,
    pub low_confidence: u64,
}

impl IngestStats {
    pub fn dropped(&self) -> u64 {
        self.untracked + self.foreign_class + self.low_confidence
    }
}

#[derive(Debug, Default)]
struct RegionState {
    instance_count: u64,
    unique_track_ids: HashSet<i64>,
    type_instance_count: BTreeMap<VehicleType, u64>,
}

impl RegionState {
    fn record(&mut self, track_id: i64, vehicle_type: VehicleType) {
        self.instance_count += 1;
        self.unique_track_ids.insert(track_id);
        *self.type_instance_count.entry(vehicle_type).or_insert(0) += 1;
    }

    fn counts(&self) -> RegionCounts {
        RegionCounts {
            count: self.instance_count,
            unique_count: self.unique_track_ids.len() as u64,
            types: self.type_instance_count.clone(),
        }
    }
}

#[derive(Debug)]
struct AggregationState {
    global_unique_track_ids: HashSet<i64>,
    unique_track_ids_by_type: BTreeMap<VehicleType, HashSet<i64>>,
    instance_count_by_type: BTreeMap<VehicleType, u64>,
    /// One entry per configured region, same order as the region list.
    region_state: Vec<RegionState>,
}

impl AggregationState {
    fn new(region_count: usize) -> Self {
        Self {
            global_unique_track_ids: HashSet::new(),
            unique_track_ids_by_type: BTreeMap::new(),
            instance_count_by_type: BTreeMap::new(),
            region_state: (0..region_count).map(|_| RegionState::default()).collect(),
        }
    }

    fn snapshot(&self, regions: &[Region]) -> CountSnapshot {
        CountSnapshot {
            total_vehicles: self.global_unique_track_ids.len() as u64,
            vehicles_by_type: self.instance_count_by_type.clone(),
            vehicles_by_type_unique: self
                .unique_track_ids_by_type
                .iter()
                .map(|(t, ids)| (*t, ids.len() as u64))
                .collect(),
            vehicles_by_region: regions
                .iter()
                .zip(&self.region_state)
                .map(|(region, state)| (region.name().to_string(), state.counts()))
                .collect(),
        }
    }
}

enum Phase {
    Accumulating(AggregationState),
    Finalized(CountSnapshot),
}

pub struct TrackAggregator {
    regions: Vec<Region>,
    conf_threshold: f32,
    last_frame: Option<u64>,
    stats: IngestStats,
    phase: Phase,
}

impl TrackAggregator {
    pub fn new(regions: Vec<Region>, conf_threshold: f32) -> Self {
        let state = AggregationState::new(regions.len());
        Self {
            regions,
            conf_threshold,
            last_frame: None,
            stats: IngestStats::default(),
            phase: Phase::Accumulating(state),
        }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self.phase, Phase::Finalized(_))
    }

    /// Folds one frame's detections into the running state.
    ///
    /// Frame indices must not decrease between calls; gaps are expected.
    /// Individual malformed detections are skipped, never fatal.
    pub fn ingest(
        &mut self,
        frame_index: u64,
        detections: &[DetectionEvent],
    ) -> Result<(), AggregateError> {
        let state = match &mut self.phase {
            Phase::Accumulating(state) => state,
            Phase::Finalized(_) => return Err(AggregateError::Finalized),
        };
        if let Some(previous) = self.last_frame {
            if frame_index < previous {
                return Err(AggregateError::StreamOrder {
                    previous,
                    got: frame_index,
                });
            }
        }
        self.last_frame = Some(frame_index);
        self.stats.batches += 1;

        for det in detections {
            let Some(vehicle_type) = det.vehicle_type() else {
                self.stats.foreign_class += 1;
                continue;
            };
            let Some(track_id) = det.tracked_id() else {
                self.stats.untracked += 1;
                continue;
            };
            // NaN confidence fails this comparison as well
            if !(det.confidence >= self.conf_threshold) {
                self.stats.low_confidence += 1;
                continue;
            }

            state.global_unique_track_ids.insert(track_id);
            state
                .unique_track_ids_by_type
                .entry(vehicle_type)
                .or_default()
                .insert(track_id);
            *state.instance_count_by_type.entry(vehicle_type).or_insert(0) += 1;

            let point = det.reference_point();
            for (region, tally) in self.regions.iter().zip(state.region_state.iter_mut()) {
                if region.contains(point) {
                    tally.record(track_id, vehicle_type);
                }
            }
            self.stats.accepted += 1;
        }
        Ok(())
    }

    /// Freezes the aggregator and returns the snapshot. Repeat calls return
    /// the same snapshot.
    pub fn finalize(&mut self) -> CountSnapshot {
        let snapshot = match &self.phase {
            Phase::Finalized(snapshot) => return snapshot.clone(),
            Phase::Accumulating(state) => state.snapshot(&self.regions),
        };
        log::debug!(
            "aggregator finalized: batches={} accepted={} dropped={} unique={}",
            self.stats.batches,
            self.stats.accepted,
            self.stats.dropped(),
            snapshot.total_vehicles
        );
        self.phase = Phase::Finalized(snapshot.clone());
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use crate::region::Point;

    fn car(frame: u64, id: i64, cx: f32, cy: f32) -> DetectionEvent {
        DetectionEvent::vehicle(
            frame,
            id,
            VehicleType::Car,
            0.9,
            BoundingBox::new(cx - 2.0, cy - 2.0, cx + 2.0, cy + 2.0),
        )
    }

    fn rect(name: &str, x1: f32, y1: f32, x2: f32, y2: f32) -> Region {
        Region::new(
            name,
            vec![
                Point::new(x1, y1),
                Point::new(x2, y1),
                Point::new(x2, y2),
                Point::new(x1, y2),
            ],
        )
        .unwrap()
    }

    fn assert_invariants(snapshot: &CountSnapshot) {
        for (t, unique) in &snapshot.vehicles_by_type_unique {
            assert!(*unique <= snapshot.vehicles_by_type[t]);
        }
        let max_unique = snapshot.vehicles_by_type_unique.values().copied().max();
        assert!(snapshot.total_vehicles >= max_unique.unwrap_or(0));
        for counts in snapshot.vehicles_by_region.values() {
            assert!(counts.unique_count <= counts.count);
            assert_eq!(counts.types.values().sum::<u64>(), counts.count);
        }
    }

    #[test]
    fn persistent_tracks_count_once() {
        let mut agg = TrackAggregator::new(vec![], 0.5);
        // ids 1,2,3 over five sampled frames; id 1 leaves and id 4 arrives for five more
        for (n, frame) in (10..=100).step_by(10).enumerate() {
            let ids: &[i64] = if n < 5 { &[1, 2, 3] } else { &[2, 3, 4] };
            let batch: Vec<_> = ids.iter().map(|id| car(frame, *id, 50.0, 50.0)).collect();
            agg.ingest(frame, &batch).unwrap();
        }
        let snapshot = agg.finalize();
        assert_eq!(snapshot.total_vehicles, 4);
        assert_eq!(snapshot.vehicles_by_type_unique[&VehicleType::Car], 4);
        assert_eq!(snapshot.vehicles_by_type[&VehicleType::Car], 30);
        assert_invariants(&snapshot);
    }

    #[test]
    fn untracked_detection_is_a_no_op() {
        let mut with = TrackAggregator::new(vec![rect("all", 0.0, 0.0, 100.0, 100.0)], 0.5);
        let mut without = TrackAggregator::new(vec![rect("all", 0.0, 0.0, 100.0, 100.0)], 0.5);

        let mut untracked = car(1, 0, 10.0, 10.0);
        untracked.track_id = None;
        let mut sentinel = car(1, 0, 10.0, 10.0);
        sentinel.track_id = Some(-1);

        with.ingest(1, &[car(1, 7, 10.0, 10.0), untracked, sentinel])
            .unwrap();
        without.ingest(1, &[car(1, 7, 10.0, 10.0)]).unwrap();

        assert_eq!(with.finalize(), without.finalize());
        assert_eq!(with.stats().untracked, 2);
    }

    #[test]
    fn foreign_classes_and_low_confidence_are_dropped() {
        let mut agg = TrackAggregator::new(vec![], 0.6);
        let mut person = car(1, 1, 5.0, 5.0);
        person.class_id = 0;
        let mut faint = car(1, 2, 5.0, 5.0);
        faint.confidence = 0.59;
        let mut nan = car(1, 3, 5.0, 5.0);
        nan.confidence = f32::NAN;
        let mut exact = car(1, 4, 5.0, 5.0);
        exact.confidence = 0.6;

        agg.ingest(1, &[person, faint, nan, exact]).unwrap();
        let snapshot = agg.finalize();
        assert_eq!(snapshot.total_vehicles, 1);
        assert_eq!(agg.stats().foreign_class, 1);
        assert_eq!(agg.stats().low_confidence, 2);
    }

    #[test]
    fn overlapping_regions_count_independently() {
        let regions = vec![
            rect("west", 0.0, 0.0, 60.0, 100.0),
            rect("east", 40.0, 0.0, 100.0, 100.0),
        ];
        let mut agg = TrackAggregator::new(regions, 0.5);
        agg.ingest(1, &[car(1, 9, 50.0, 50.0)]).unwrap();
        agg.ingest(2, &[car(2, 9, 50.0, 52.0)]).unwrap();
        let snapshot = agg.finalize();

        assert_eq!(snapshot.total_vehicles, 1);
        for key in ["west", "east"] {
            let counts = &snapshot.vehicles_by_region[key];
            assert_eq!(counts.unique_count, 1);
            assert_eq!(counts.count, 2);
            assert_eq!(counts.types[&VehicleType::Car], 2);
        }
        assert_invariants(&snapshot);
    }

    #[test]
    fn unmatched_regions_report_zero() {
        let mut agg = TrackAggregator::new(vec![rect("corner", 0.0, 0.0, 5.0, 5.0)], 0.5);
        agg.ingest(1, &[car(1, 1, 80.0, 80.0)]).unwrap();
        let snapshot = agg.finalize();
        assert_eq!(
            snapshot.vehicles_by_region["corner"],
            RegionCounts::default()
        );
    }

    #[test]
    fn same_track_with_two_types_counts_once_globally() {
        let mut agg = TrackAggregator::new(vec![], 0.5);
        let mut as_truck = car(2, 5, 1.0, 1.0);
        as_truck.class_id = VehicleType::Truck.class_id();
        agg.ingest(1, &[car(1, 5, 1.0, 1.0)]).unwrap();
        agg.ingest(2, &[as_truck]).unwrap();
        let snapshot = agg.finalize();
        assert_eq!(snapshot.total_vehicles, 1);
        assert_eq!(snapshot.vehicles_by_type_unique[&VehicleType::Car], 1);
        assert_eq!(snapshot.vehicles_by_type_unique[&VehicleType::Truck], 1);
    }

    #[test]
    fn rejects_decreasing_frame_index() {
        let mut agg = TrackAggregator::new(vec![], 0.5);
        agg.ingest(10, &[]).unwrap();
        agg.ingest(10, &[]).unwrap();
        assert_eq!(
            agg.ingest(9, &[]),
            Err(AggregateError::StreamOrder {
                previous: 10,
                got: 9
            })
        );
        agg.ingest(30, &[]).unwrap();
    }

    #[test]
    fn finalize_is_idempotent_and_terminal() {
        let mut agg = TrackAggregator::new(vec![], 0.5);
        agg.ingest(1, &[car(1, 1, 0.0, 0.0)]).unwrap();
        let first = agg.finalize();
        assert!(agg.is_finalized());
        assert_eq!(
            agg.ingest(2, &[car(2, 2, 0.0, 0.0)]),
            Err(AggregateError::Finalized)
        );
        assert_eq!(agg.finalize(), first);
        assert_eq!(first.total_vehicles, 1);
    }

    #[test]
    fn snapshot_serializes_to_result_schema() {
        let mut agg = TrackAggregator::new(vec![rect("gate", 0.0, 0.0, 10.0, 10.0)], 0.5);
        agg.ingest(1, &[car(1, 1, 5.0, 5.0)]).unwrap();
        let json = serde_json::to_value(agg.finalize()).unwrap();
        assert_eq!(json["total_vehicles"], 1);
        assert_eq!(json["vehicles_by_type"]["car"], 1);
        assert_eq!(json["vehicles_by_type_unique"]["car"], 1);
        assert_eq!(json["vehicles_by_region"]["gate"]["count"], 1);
        assert_eq!(json["vehicles_by_region"]["gate"]["unique_count"], 1);
        assert_eq!(json["vehicles_by_region"]["gate"]["types"]["car"], 1);
    }
}
