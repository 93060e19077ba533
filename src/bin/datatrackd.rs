//! datatrackd - vehicle counting job service
//!
//! This daemon:
//! 1. Loads configuration (DATATRACK_CONFIG + DATATRACK_* overrides)
//! 2. Probes the host and picks a hardware profile
//! 3. Sizes the worker pool and registers detector backends
//! 4. Serves the HTTP job API until Ctrl-C

use anyhow::{anyhow, Context, Result};
use std::sync::{mpsc, Arc};

use datatrack::{
    api::{ApiConfig, ApiServer, ApiState, JobDefaults},
    builtin_registry, DatatrackConfig, FilesystemResultStore, HardwareFacts, JobManager,
    UploadStore, VideoRunner,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = DatatrackConfig::load()?;

    let facts = HardwareFacts::probe(config.device, config.gpu_memory_gb);
    let profile = facts.profile();
    let info = facts.info();
    log::info!(
        "hardware: {} ({} cores, {:.1} GB RAM, {:.1} GB accelerator) -> {}",
        info.device,
        info.cpu_cores,
        info.ram_gb,
        info.vram_gb,
        info.profile
    );

    let mut detectors = builtin_registry();
    detectors
        .set_default(&config.detector)
        .with_context(|| format!("available backends: {}", detectors.list().join(", ")))?;
    log::info!("detector backend: {}", config.detector);

    let results = FilesystemResultStore::open(&config.results_dir)?;
    let uploads = UploadStore::open(&config.upload_dir, config.max_upload_bytes)?;

    let defaults = JobDefaults {
        conf_threshold: profile.default_confidence,
        frame_skip: profile.frame_skip,
    };
    let runner = Arc::new(VideoRunner::new(detectors));
    let jobs = match config.workers {
        Some(workers) => {
            JobManager::with_capacity_override(profile, workers, runner, Arc::new(results))
        }
        None => JobManager::from_profile(profile, runner, Arc::new(results)),
    };
    log::info!(
        "worker pool: {} slots; uploads in {}, results in {}",
        jobs.capacity(),
        config.upload_dir.display(),
        config.results_dir.display()
    );

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        max_connections: config.max_connections,
    };
    let state = ApiState {
        jobs,
        uploads: Arc::new(uploads),
        hardware: info,
        defaults,
    };
    let api_handle = ApiServer::new(api_config, state).spawn()?;
    log::info!("datatrackd running on http://{}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("datatrackd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
