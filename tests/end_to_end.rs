use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tempfile::tempdir;

use datatrack::detect::{NullFactory, ReplayFactory};
use datatrack::export::render_csv;
use datatrack::{
    AnalysisSettings, DetectorRegistry, FilesystemResultStore, JobId, JobManager, JobRequest,
    JobStatus, Point, Region, VehicleType, VideoRunner,
};

const VIDEO: &str = "stub://junction?frames=100&fps=25&width=640&height=480";

fn detection(track_id: Option<i64>, class_id: u32, confidence: f32, cx: f32, cy: f32) -> String {
    let track = match track_id {
        Some(id) => id.to_string(),
        None => "null".to_string(),
    };
    format!(
        r#"{{"track_id": {track}, "class_id": {class_id}, "confidence": {confidence}, "bbox": [{}, {}, {}, {}]}}"#,
        cx - 10.0,
        cy - 10.0,
        cx + 10.0,
        cy + 10.0
    )
}

/// Recorded tracks for a 100-frame junction clip.
///
/// - track 1: car on the left, frames 10..=50
/// - track 2: truck on the right, frames 30..=100
/// - track 3: bus on frame 5 only (never sampled with skip 10)
/// - plus a pedestrian, a low-confidence car and an untracked car on every
///   frame, none of which count
fn junction_tracks() -> String {
    let mut out = String::from("# junction clip\n");
    for frame in 1..=100u32 {
        let mut dets = vec![
            detection(Some(9), 0, 0.95, 300.0, 300.0),
            detection(Some(5), 2, 0.30, 100.0, 300.0),
            detection(None, 2, 0.90, 500.0, 300.0),
        ];
        if (10..=50).contains(&frame) {
            dets.push(detection(Some(1), 2, 0.90, 100.0, 100.0));
        }
        if frame >= 30 {
            dets.push(detection(Some(2), 7, 0.80, 400.0, 100.0));
        }
        if frame == 5 {
            dets.push(detection(Some(3), 5, 0.99, 100.0, 100.0));
        }
        out.push_str(&format!(
            "{{\"frame\": {frame}, \"detections\": [{}]}}\n",
            dets.join(", ")
        ));
    }
    out
}

fn rect(name: &str, x0: f32, x1: f32) -> Region {
    Region::new(
        name,
        vec![
            Point::new(x0, 0.0),
            Point::new(x1, 0.0),
            Point::new(x1, 480.0),
            Point::new(x0, 480.0),
        ],
    )
    .unwrap()
}

fn settings() -> AnalysisSettings {
    AnalysisSettings {
        regions: vec![
            rect("left", 0.0, 320.0),
            rect("right", 320.0, 640.0),
            rect("all", 0.0, 640.0),
        ],
        conf_threshold: 0.5,
        frame_skip: 10,
    }
}

fn wait_terminal(jobs: &JobManager, id: JobId) -> JobStatus {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = jobs.status(id).unwrap().status;
        if status.is_terminal() {
            return status;
        }
        assert!(Instant::now() < deadline, "job did not finish");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn replayed_tracks_produce_expected_counts() {
    let dir = tempdir().unwrap();
    let tracks = dir.path().join("junction.tracks.jsonl");
    std::fs::write(&tracks, junction_tracks()).unwrap();

    let mut detectors = DetectorRegistry::new();
    detectors.register(ReplayFactory::from_file(&tracks));
    detectors.register(NullFactory);
    let store = Arc::new(FilesystemResultStore::open(dir.path().join("results")).unwrap());
    let jobs = JobManager::new(2, Arc::new(VideoRunner::new(detectors)), store);

    let id = jobs.create_job(JobRequest::new(VIDEO, settings())).unwrap();
    assert_eq!(wait_terminal(&jobs, id), JobStatus::Completed);
    assert!(dir
        .path()
        .join("results")
        .join(format!("results_{id}.json"))
        .is_file());

    let result = jobs.result(id).unwrap();
    assert_eq!(result.total_frames, 100);
    assert_eq!(result.fps, 25.0);
    assert_eq!((result.width, result.height), (640, 480));

    let counts = &result.counts;
    assert_eq!(counts.total_vehicles, 2);
    // car on sampled frames 10..=50, truck on 30..=100
    assert_eq!(
        counts.vehicles_by_type,
        BTreeMap::from([(VehicleType::Car, 5), (VehicleType::Truck, 8)])
    );
    assert_eq!(
        counts.vehicles_by_type_unique,
        BTreeMap::from([(VehicleType::Car, 1), (VehicleType::Truck, 1)])
    );

    let left = &counts.vehicles_by_region["left"];
    assert_eq!((left.unique_count, left.count), (1, 5));
    let right = &counts.vehicles_by_region["right"];
    assert_eq!((right.unique_count, right.count), (1, 8));
    let all = &counts.vehicles_by_region["all"];
    assert_eq!((all.unique_count, all.count), (2, 13));

    let csv = render_csv(
        &result,
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap(),
    );
    assert!(csv.contains("Date,2024-05-01 08:30:00\r\n"));
    assert!(csv.contains("Total Unique Vehicles,2\r\n"));
    assert!(csv.contains("Total Frames,100\r\n"));
    assert!(csv.contains("Car,1\r\n"));
    assert!(csv.contains("Truck,8\r\n"));
    assert!(csv.contains("all,2,13,\"car: 5, truck: 8\"\r\n"));

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["total_vehicles"], 2);
    assert_eq!(json["vehicles_by_type"]["truck"], 8);
    assert_eq!(json["vehicles_by_region"]["left"]["unique_count"], 1);
}

#[test]
fn missing_tracks_fail_the_job() {
    let dir = tempdir().unwrap();
    let mut detectors = DetectorRegistry::new();
    detectors.register(ReplayFactory::from_file(dir.path().join("absent.jsonl")));
    let store = Arc::new(FilesystemResultStore::open(dir.path()).unwrap());
    let jobs = JobManager::new(1, Arc::new(VideoRunner::new(detectors)), store);

    let id = jobs.create_job(JobRequest::new(VIDEO, settings())).unwrap();
    assert_eq!(wait_terminal(&jobs, id), JobStatus::Failed);
    let error = jobs.status(id).unwrap().error.unwrap();
    assert!(error.starts_with("detector failed"), "{error}");
}

#[test]
fn null_backend_counts_nothing() {
    let dir = tempdir().unwrap();
    let mut detectors = DetectorRegistry::new();
    detectors.register(ReplayFactory::sidecar());
    detectors.register(NullFactory);
    let store = Arc::new(FilesystemResultStore::open(dir.path()).unwrap());
    let runner = VideoRunner::with_backend(detectors, "null");
    let jobs = JobManager::new(1, Arc::new(runner), store);

    let id = jobs.create_job(JobRequest::new(VIDEO, settings())).unwrap();
    assert_eq!(wait_terminal(&jobs, id), JobStatus::Completed);
    let result = jobs.result(id).unwrap();
    assert_eq!(result.counts.total_vehicles, 0);
    assert_eq!(result.counts.vehicles_by_region.len(), 3);
    assert_eq!(result.counts.vehicles_by_region["all"].count, 0);
}
