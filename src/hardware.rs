//! Hardware tuning profiles.
//!
//! `classify` is a pure table lookup from coarse hardware facts to sampling
//! and pool parameters. `HardwareFacts::probe` gathers those facts from the
//! host once at startup.

use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

const NVIDIA_GPU_NODE: &str = "/proc/driver/nvidia/gpus";
const MEMINFO: &str = "/proc/meminfo";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Gpu,
    Cpu,
    Unknown,
}

impl DeviceClass {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceClass::Gpu => "cuda",
            DeviceClass::Cpu => "cpu",
            DeviceClass::Unknown => "unknown",
        }
    }
}

/// Configured device selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Gpu,
}

impl FromStr for DevicePreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "gpu" | "cuda" => Ok(DevicePreference::Gpu),
            other => Err(anyhow!("unknown device '{}' (expected auto, cpu or gpu)", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HardwareProfile {
    pub name: &'static str,
    pub device_class: DeviceClass,
    pub frame_skip: u32,
    pub default_confidence: f32,
    pub worker_count: usize,
    pub batch_size: usize,
}

/// Maps hardware facts to a tuning profile.
///
/// For GPUs `memory_gb` is accelerator memory; it is ignored on CPU.
/// Unknown devices land in the smallest CPU tier. Worker count is at least 1.
pub fn classify(device_class: DeviceClass, core_count: usize, memory_gb: f64) -> HardwareProfile {
    let cores = core_count as i64;
    let workers = |n: i64| n.max(1) as usize;
    match device_class {
        DeviceClass::Gpu if memory_gb >= 8.0 => HardwareProfile {
            name: "GPU_HIGH",
            device_class,
            frame_skip: 1,
            default_confidence: 0.5,
            worker_count: workers(8_i64.min(cores - 2)),
            batch_size: 32,
        },
        DeviceClass::Gpu => HardwareProfile {
            name: "GPU_LOW",
            device_class,
            frame_skip: 2,
            default_confidence: 0.6,
            worker_count: workers(4_i64.min(cores - 2)),
            batch_size: 16,
        },
        DeviceClass::Cpu if core_count >= 8 => HardwareProfile {
            name: "CPU_HIGH",
            device_class,
            frame_skip: 3,
            default_confidence: 0.65,
            worker_count: workers(cores - 2),
            batch_size: 8,
        },
        DeviceClass::Cpu | DeviceClass::Unknown => HardwareProfile {
            name: "CPU_LOW",
            device_class,
            frame_skip: 5,
            default_confidence: 0.7,
            worker_count: workers(cores - 1),
            batch_size: 4,
        },
    }
}

/// Coarse facts about the host.
#[derive(Clone, Debug, PartialEq)]
pub struct HardwareFacts {
    pub device_class: DeviceClass,
    pub cpu_cores: usize,
    pub ram_gb: f64,
    pub accelerator_memory_gb: f64,
}

impl HardwareFacts {
    /// Probes the host. `gpu_memory_gb` comes from configuration since there
    /// is no portable way to read accelerator memory without a driver SDK.
    pub fn probe(preference: DevicePreference, gpu_memory_gb: Option<f64>) -> Self {
        let device_class = match preference {
            DevicePreference::Cpu => DeviceClass::Cpu,
            DevicePreference::Gpu => DeviceClass::Gpu,
            DevicePreference::Auto => {
                if Path::new(NVIDIA_GPU_NODE).is_dir() {
                    DeviceClass::Gpu
                } else {
                    DeviceClass::Cpu
                }
            }
        };
        let accelerator_memory_gb = match device_class {
            DeviceClass::Gpu => gpu_memory_gb.unwrap_or(0.0),
            _ => 0.0,
        };
        let ram_gb = std::fs::read_to_string(MEMINFO)
            .ok()
            .and_then(|raw| parse_mem_total_gb(&raw))
            .unwrap_or(0.0);
        Self {
            device_class,
            cpu_cores: num_cpus::get(),
            ram_gb,
            accelerator_memory_gb,
        }
    }

    pub fn profile(&self) -> HardwareProfile {
        classify(
            self.device_class,
            self.cpu_cores,
            self.accelerator_memory_gb,
        )
    }

    pub fn info(&self) -> HardwareInfo {
        let profile = self.profile();
        HardwareInfo {
            device: self.device_class.as_str().to_string(),
            cpu_cores: self.cpu_cores,
            ram_gb: round2(self.ram_gb),
            vram_gb: round2(self.accelerator_memory_gb),
            profile: profile.name.to_string(),
            batch_size: profile.batch_size,
            workers: profile.worker_count,
            frame_skip: profile.frame_skip,
            confidence: profile.default_confidence,
        }
    }
}

/// Host summary served by the API and logged at startup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HardwareInfo {
    pub device: String,
    pub cpu_cores: usize,
    pub ram_gb: f64,
    pub vram_gb: f64,
    pub profile: String,
    pub batch_size: usize,
    pub workers: usize,
    pub frame_skip: u32,
    pub confidence: f32,
}

fn parse_mem_total_gb(meminfo: &str) -> Option<f64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: f64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / (1024.0 * 1024.0))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
