//! CSV report for a completed analysis.
//!
//! The report is a sequence of small tables separated by blank lines, so it
//! is written row by row rather than as one rectangular table. Fields are
//! quoted per RFC 4180 and rows end with CRLF.

use chrono::NaiveDateTime;

use crate::detect::VehicleType;
use crate::pipeline::AnalysisResult;

pub const REPORT_TITLE: &str = "DataTrack - Vehicle Count Results";

/// Suggested download name for a job's report.
pub fn report_filename(job_id: impl std::fmt::Display) -> String {
    format!("results_{}.csv", job_id)
}

pub fn render_csv(result: &AnalysisResult, generated_at: NaiveDateTime) -> String {
    let mut out = CsvOut::default();
    let counts = &result.counts;

    out.row(&[REPORT_TITLE]);
    out.row(&[
        "Date".to_string(),
        generated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    ]);
    out.blank();

    out.row(&["Summary"]);
    out.row(&[
        "Total Unique Vehicles".to_string(),
        counts.total_vehicles.to_string(),
    ]);
    out.row(&["Total Frames".to_string(), result.total_frames.to_string()]);
    out.row(&["FPS".to_string(), result.fps.to_string()]);
    out.blank();

    out.row(&["Unique Vehicles by Type"]);
    out.row(&["Type", "Unique Count"]);
    for (vehicle_type, count) in &counts.vehicles_by_type_unique {
        out.row(&[capitalize(*vehicle_type), count.to_string()]);
    }
    out.blank();

    out.row(&["Detections (Instances) by Type"]);
    out.row(&["Type", "Total Detections"]);
    for (vehicle_type, count) in &counts.vehicles_by_type {
        out.row(&[capitalize(*vehicle_type), count.to_string()]);
    }
    out.blank();

    out.row(&["NOTE:"]);
    out.row(&["Unique Vehicles = number of distinct vehicles"]);
    out.row(&[
        "Detections = number of times detected (the same vehicle may count in several frames)",
    ]);
    out.blank();

    out.row(&["Counts by Region"]);
    out.row(&["Region", "Unique Vehicles", "Total Detections", "Types"]);
    for (region, tally) in &counts.vehicles_by_region {
        let types = tally
            .types
            .iter()
            .map(|(t, c)| format!("{}: {}", t, c))
            .collect::<Vec<_>>()
            .join(", ");
        out.row(&[
            region.clone(),
            tally.unique_count.to_string(),
            tally.count.to_string(),
            types,
        ]);
    }

    out.buf
}

#[derive(Default)]
struct CsvOut {
    buf: String,
}

impl CsvOut {
    fn row<S: AsRef<str>>(&mut self, fields: &[S]) {
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                self.buf.push(',');
            }
            push_field(&mut self.buf, field.as_ref());
        }
        self.buf.push_str("\r\n");
    }

    fn blank(&mut self) {
        self.buf.push_str("\r\n");
    }
}

fn push_field(buf: &mut String, field: &str) {
    if field.contains([',', '"', '\r', '\n']) {
        buf.push('"');
        buf.push_str(&field.replace('"', "\"\""));
        buf.push('"');
    } else {
        buf.push_str(field);
    }
}

fn capitalize(vehicle_type: VehicleType) -> String {
    let name = vehicle_type.as_str();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{CountSnapshot, RegionCounts};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn stamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 0)
            .unwrap()
    }

    fn result() -> AnalysisResult {
        let mut by_region = BTreeMap::new();
        by_region.insert(
            "north, lane 1".to_string(),
            RegionCounts {
                count: 12,
                unique_count: 4,
                types: BTreeMap::from([(VehicleType::Car, 9), (VehicleType::Bus, 3)]),
            },
        );
        by_region.insert("south".to_string(), RegionCounts::default());
        AnalysisResult {
            total_frames: 900,
            fps: 29.97,
            width: 1280,
            height: 720,
            counts: CountSnapshot {
                total_vehicles: 5,
                vehicles_by_type: BTreeMap::from([(VehicleType::Car, 20), (VehicleType::Bus, 4)]),
                vehicles_by_type_unique: BTreeMap::from([
                    (VehicleType::Car, 4),
                    (VehicleType::Bus, 1),
                ]),
                vehicles_by_region: by_region,
            },
        }
    }

    #[test]
    fn report_layout() {
        let csv = render_csv(&result(), stamp());
        let lines: Vec<&str> = csv.split("\r\n").collect();
        assert_eq!(lines[0], REPORT_TITLE);
        assert_eq!(lines[1], "Date,2024-03-09 14:05:00");
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "Summary");
        assert_eq!(lines[4], "Total Unique Vehicles,5");
        assert_eq!(lines[5], "Total Frames,900");
        assert_eq!(lines[6], "FPS,29.97");
        assert!(csv.contains("Type,Unique Count\r\nCar,4\r\nBus,1\r\n"));
        assert!(csv.contains("Type,Total Detections\r\nCar,20\r\nBus,4\r\n"));
        assert!(csv.contains("\"north, lane 1\",4,12,\"car: 9, bus: 3\"\r\n"));
        assert!(csv.ends_with("south,0,0,\r\n"));
    }

    #[test]
    fn quotes_are_doubled() {
        let mut buf = String::new();
        push_field(&mut buf, "say \"hi\"");
        assert_eq!(buf, "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn file_name() {
        assert_eq!(report_filename("abc"), "results_abc.csv");
    }
}
