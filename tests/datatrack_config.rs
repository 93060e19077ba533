use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::{Builder, NamedTempFile};

use datatrack::config::DatatrackConfig;
use datatrack::hardware::DevicePreference;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "DATATRACK_CONFIG",
        "DATATRACK_API_ADDR",
        "DATATRACK_UPLOAD_DIR",
        "DATATRACK_RESULTS_DIR",
        "DATATRACK_WORKERS",
        "DATATRACK_DEVICE",
        "DATATRACK_GPU_MEMORY_GB",
        "DATATRACK_DETECTOR",
        "DATATRACK_MAX_UPLOAD_BYTES",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = DatatrackConfig::load().expect("load defaults");
    assert_eq!(cfg, DatatrackConfig::default());
    assert_eq!(cfg.api_addr, "127.0.0.1:5000");
    assert_eq!(cfg.max_upload_bytes, 2000 * 1024 * 1024);
    assert_eq!(cfg.workers, None);
    assert_eq!(cfg.detector, "replay");
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "api": { "addr": "0.0.0.0:9000", "max_connections": 4 },
        "storage": { "upload_dir": "/srv/uploads", "results_dir": "/srv/results" },
        "pool": { "workers": 3 },
        "hardware": { "device": "gpu", "gpu_memory_gb": 8.0 },
        "detector": { "backend": "Null" }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("DATATRACK_CONFIG", file.path());
    std::env::set_var("DATATRACK_RESULTS_DIR", "/var/lib/datatrack/results");
    std::env::set_var("DATATRACK_WORKERS", "2");

    let cfg = DatatrackConfig::load().expect("load config");
    assert_eq!(cfg.api_addr, "0.0.0.0:9000");
    assert_eq!(cfg.max_connections, 4);
    assert_eq!(cfg.upload_dir, PathBuf::from("/srv/uploads"));
    assert_eq!(cfg.results_dir, PathBuf::from("/var/lib/datatrack/results"));
    assert_eq!(cfg.workers, Some(2));
    assert_eq!(cfg.device, DevicePreference::Gpu);
    assert_eq!(cfg.gpu_memory_gb, Some(8.0));
    assert_eq!(cfg.detector, "null");

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
[api]
addr = "127.0.0.1:7070"

[storage]
max_upload_bytes = 1048576

[hardware]
device = "cpu"
"#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("DATATRACK_CONFIG", file.path());

    let cfg = DatatrackConfig::load().expect("load toml config");
    assert_eq!(cfg.api_addr, "127.0.0.1:7070");
    assert_eq!(cfg.max_upload_bytes, 1_048_576);
    assert_eq!(cfg.device, DevicePreference::Cpu);
    assert_eq!(cfg.upload_dir, PathBuf::from("uploads"));

    clear_env();
}

#[test]
fn empty_env_values_are_ignored() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DATATRACK_API_ADDR", "  ");
    std::env::set_var("DATATRACK_DETECTOR", "");
    let cfg = DatatrackConfig::load().expect("load config");
    assert_eq!(cfg.api_addr, "127.0.0.1:5000");
    assert_eq!(cfg.detector, "replay");

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();

    for (key, value) in [
        ("DATATRACK_API_ADDR", "not-an-address"),
        ("DATATRACK_WORKERS", "0"),
        ("DATATRACK_WORKERS", "many"),
        ("DATATRACK_DEVICE", "tpu"),
        ("DATATRACK_GPU_MEMORY_GB", "-1"),
        ("DATATRACK_MAX_UPLOAD_BYTES", "0"),
    ] {
        clear_env();
        std::env::set_var(key, value);
        assert!(
            DatatrackConfig::load().is_err(),
            "{key}={value} should be rejected"
        );
    }

    clear_env();
}

#[test]
fn rejects_unknown_sections_and_missing_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "rtsp": { "url": "rtsp://camera" } }"#)
        .expect("write config");
    std::env::set_var("DATATRACK_CONFIG", file.path());
    assert!(DatatrackConfig::load().is_err());

    std::env::set_var("DATATRACK_CONFIG", "/nonexistent/datatrack.json");
    assert!(DatatrackConfig::load().is_err());

    clear_env();
}
