use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::hardware::DevicePreference;
use crate::upload::DEFAULT_MAX_UPLOAD_BYTES;

const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_RESULTS_DIR: &str = "results";
const DEFAULT_DETECTOR: &str = "replay";
const DEFAULT_MAX_CONNECTIONS: usize = 16;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DatatrackConfigFile {
    api: Option<ApiConfigFile>,
    storage: Option<StorageConfigFile>,
    pool: Option<PoolConfigFile>,
    hardware: Option<HardwareConfigFile>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_connections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    upload_dir: Option<PathBuf>,
    results_dir: Option<PathBuf>,
    max_upload_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct PoolConfigFile {
    workers: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct HardwareConfigFile {
    device: Option<String>,
    gpu_memory_gb: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
}

/// Service configuration for `datatrackd`.
///
/// Sources, lowest precedence first: built-in defaults, the file named by
/// `DATATRACK_CONFIG` (JSON, or TOML for `.toml` files), `DATATRACK_*`
/// environment overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct DatatrackConfig {
    pub api_addr: String,
    pub max_connections: usize,
    pub upload_dir: PathBuf,
    pub results_dir: PathBuf,
    pub max_upload_bytes: u64,
    /// Pool size override. `None` uses the hardware profile.
    pub workers: Option<usize>,
    pub device: DevicePreference,
    pub gpu_memory_gb: Option<f64>,
    pub detector: String,
}

impl Default for DatatrackConfig {
    fn default() -> Self {
        Self {
            api_addr: DEFAULT_API_ADDR.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            workers: None,
            device: DevicePreference::Auto,
            gpu_memory_gb: None,
            detector: DEFAULT_DETECTOR.to_string(),
        }
    }
}

impl DatatrackConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DATATRACK_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty());
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DatatrackConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let api = file.api.unwrap_or_default();
        let storage = file.storage.unwrap_or_default();
        let hardware = file.hardware.unwrap_or_default();
        let device = match hardware.device {
            Some(raw) => raw.parse()?,
            None => defaults.device,
        };
        Ok(Self {
            api_addr: api.addr.unwrap_or(defaults.api_addr),
            max_connections: api.max_connections.unwrap_or(defaults.max_connections),
            upload_dir: storage.upload_dir.unwrap_or(defaults.upload_dir),
            results_dir: storage.results_dir.unwrap_or(defaults.results_dir),
            max_upload_bytes: storage
                .max_upload_bytes
                .unwrap_or(defaults.max_upload_bytes),
            workers: file.pool.and_then(|pool| pool.workers),
            device,
            gpu_memory_gb: hardware.gpu_memory_gb,
            detector: file
                .detector
                .and_then(|detector| detector.backend)
                .unwrap_or(defaults.detector),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_value("DATATRACK_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(dir) = env_value("DATATRACK_UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_value("DATATRACK_RESULTS_DIR") {
            self.results_dir = PathBuf::from(dir);
        }
        if let Some(workers) = env_value("DATATRACK_WORKERS") {
            let workers: usize = workers
                .parse()
                .map_err(|_| anyhow!("DATATRACK_WORKERS must be a positive integer"))?;
            self.workers = Some(workers);
        }
        if let Some(device) = env_value("DATATRACK_DEVICE") {
            self.device = device.parse().context("DATATRACK_DEVICE")?;
        }
        if let Some(mem) = env_value("DATATRACK_GPU_MEMORY_GB") {
            let mem: f64 = mem
                .parse()
                .map_err(|_| anyhow!("DATATRACK_GPU_MEMORY_GB must be a number"))?;
            self.gpu_memory_gb = Some(mem);
        }
        if let Some(detector) = env_value("DATATRACK_DETECTOR") {
            self.detector = detector;
        }
        if let Some(limit) = env_value("DATATRACK_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = limit
                .parse()
                .map_err(|_| anyhow!("DATATRACK_MAX_UPLOAD_BYTES must be an integer"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.api_addr
            .parse::<SocketAddr>()
            .map_err(|_| anyhow!("api addr '{}' is not a socket address", self.api_addr))?;
        if self.max_connections == 0 {
            return Err(anyhow!("api max_connections must be greater than zero"));
        }
        if self.workers == Some(0) {
            return Err(anyhow!("worker count must be greater than zero"));
        }
        if self.max_upload_bytes == 0 {
            return Err(anyhow!("max upload size must be greater than zero"));
        }
        if let Some(mem) = self.gpu_memory_gb {
            if !mem.is_finite() || mem < 0.0 {
                return Err(anyhow!("gpu memory must be a non-negative number"));
            }
        }
        self.detector = self.detector.trim().to_lowercase();
        if self.detector.is_empty() {
            return Err(anyhow!("detector backend must not be empty"));
        }
        Ok(())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<DatatrackConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    }
}
