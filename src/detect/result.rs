use std::fmt;

use serde::{Deserialize, Serialize};

use crate::region::Point;

/// Closed vehicle taxonomy. Everything else the detector reports is dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    Car,
    Motorcycle,
    Bus,
    Truck,
}

impl VehicleType {
    pub const ALL: [VehicleType; 4] = [
        VehicleType::Car,
        VehicleType::Motorcycle,
        VehicleType::Bus,
        VehicleType::Truck,
    ];

    /// Maps a COCO class id (2, 3, 5, 7) to a vehicle type.
    pub fn from_class_id(class_id: u32) -> Option<Self> {
        match class_id {
            2 => Some(VehicleType::Car),
            3 => Some(VehicleType::Motorcycle),
            5 => Some(VehicleType::Bus),
            7 => Some(VehicleType::Truck),
            _ => None,
        }
    }

    pub fn class_id(self) -> u32 {
        match self {
            VehicleType::Car => 2,
            VehicleType::Motorcycle => 3,
            VehicleType::Bus => 5,
            VehicleType::Truck => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VehicleType::Car => "car",
            VehicleType::Motorcycle => "motorcycle",
            VehicleType::Bus => "bus",
            VehicleType::Truck => "truck",
        }
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis-aligned box `(x1, y1, x2, y2)` in processing-frame pixels.
/// Serialized as a four-element array.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn center(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One tracker output entry for a sampled frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(default)]
    pub track_id: Option<i64>,
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// A detection as seen by the aggregator.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionEvent {
    pub frame_index: u64,
    /// Absent or negative means the tracker lost continuity.
    pub track_id: Option<i64>,
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl DetectionEvent {
    pub fn from_raw(frame_index: u64, raw: RawDetection) -> Self {
        Self {
            frame_index,
            track_id: raw.track_id,
            class_id: raw.class_id,
            confidence: raw.confidence,
            bbox: raw.bbox,
        }
    }

    pub fn vehicle(
        frame_index: u64,
        track_id: i64,
        vehicle_type: VehicleType,
        confidence: f32,
        bbox: BoundingBox,
    ) -> Self {
        Self {
            frame_index,
            track_id: Some(track_id),
            class_id: vehicle_type.class_id(),
            confidence,
            bbox,
        }
    }

    pub fn vehicle_type(&self) -> Option<VehicleType> {
        VehicleType::from_class_id(self.class_id)
    }

    pub fn tracked_id(&self) -> Option<i64> {
        self.track_id.filter(|id| *id >= 0)
    }

    /// Point tested against regions: the box center.
    pub fn reference_point(&self) -> Point {
        self.bbox.center()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coco_vehicle_ids_map_to_taxonomy() {
        assert_eq!(VehicleType::from_class_id(2), Some(VehicleType::Car));
        assert_eq!(VehicleType::from_class_id(7), Some(VehicleType::Truck));
        assert_eq!(VehicleType::from_class_id(0), None);
        assert_eq!(VehicleType::from_class_id(6), None);
        for t in VehicleType::ALL {
            assert_eq!(VehicleType::from_class_id(t.class_id()), Some(t));
        }
    }

    #[test]
    fn negative_track_id_is_untracked() {
        let mut ev = DetectionEvent::vehicle(
            1,
            -1,
            VehicleType::Car,
            0.9,
            BoundingBox::new(0.0, 0.0, 4.0, 4.0),
        );
        assert_eq!(ev.tracked_id(), None);
        ev.track_id = Some(0);
        assert_eq!(ev.tracked_id(), Some(0));
    }

    #[test]
    fn reference_point_is_box_center() {
        let ev = DetectionEvent::vehicle(
            1,
            3,
            VehicleType::Bus,
            0.9,
            BoundingBox::new(10.0, 20.0, 30.0, 60.0),
        );
        assert_eq!(ev.reference_point(), Point::new(20.0, 40.0));
    }

    #[test]
    fn raw_detection_reads_tracker_json() {
        let raw: RawDetection = serde_json::from_str(
            r#"{"track_id": 12, "class_id": 5, "confidence": 0.81, "bbox": [1, 2, 3, 4]}"#,
        )
        .unwrap();
        assert_eq!(raw.track_id, Some(12));
        assert_eq!(raw.bbox, BoundingBox::new(1.0, 2.0, 3.0, 4.0));

        let untracked: RawDetection =
            serde_json::from_str(r#"{"class_id": 2, "confidence": 0.9, "bbox": [0, 0, 1, 1]}"#)
                .unwrap();
        assert_eq!(untracked.track_id, None);
    }
}
