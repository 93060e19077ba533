//! analyze_video - count vehicles in one video without the service

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use datatrack::detect::{NullFactory, ReplayFactory};
use datatrack::export::render_csv;
use datatrack::{
    analyze, build_regions, open_video_or_timeline, AnalysisSettings, DetectorRegistry,
    HardwareFacts, JobRequest, RegionSpec,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Video file, or a stub:// reference for synthetic frames.
    video: String,
    /// Recorded tracker output (JSON lines). Defaults to <video>.tracks.jsonl.
    #[arg(long)]
    tracks: Option<PathBuf>,
    /// Detector backend (replay|null).
    #[arg(long, default_value = "replay")]
    detector: String,
    /// Counting region as name=x1,y1;x2,y2;x3,y3 (repeatable).
    #[arg(long = "region", value_name = "REGION")]
    regions: Vec<RegionSpec>,
    /// Confidence threshold. Defaults to the hardware profile's.
    #[arg(long)]
    conf: Option<f32>,
    /// Analyse every Nth frame. Defaults to the hardware profile's.
    #[arg(long)]
    frame_skip: Option<u32>,
    /// Device used for the hardware profile (auto|cpu|gpu).
    #[arg(long, env = "DATATRACK_DEVICE", default_value = "auto")]
    device: String,
    /// Write result JSON here instead of stdout.
    #[arg(long)]
    json: Option<PathBuf>,
    /// Also write a CSV report.
    #[arg(long)]
    csv: Option<PathBuf>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty && args.json.is_none());

    let profile = {
        let _stage = ui.stage("Probe hardware");
        HardwareFacts::probe(args.device.parse()?, None).profile()
    };

    let request = JobRequest::new(
        &args.video,
        AnalysisSettings {
            regions: build_regions(args.regions)?,
            conf_threshold: args.conf.unwrap_or(profile.default_confidence),
            frame_skip: args.frame_skip.unwrap_or(profile.frame_skip),
        },
    );
    request.validate()?;

    let mut registry = DetectorRegistry::new();
    match &args.tracks {
        Some(path) => registry.register(ReplayFactory::from_file(path)),
        None => registry.register(ReplayFactory::sidecar()),
    }
    registry.register(NullFactory);

    let (mut source, mut detector) = {
        let _stage = ui.stage("Open video");
        let detector = registry.create(Some(&args.detector), &request.video_ref)?;
        let source = open_video_or_timeline(&request.video_ref, detector.timeline())?;
        (source, detector)
    };
    let info = source.info();
    eprintln!(
        "    {} frames at {:.2} fps, {}x{}; skip={} conf={} regions={} ({})",
        info.total_frames,
        info.fps,
        info.width,
        info.height,
        request.settings.frame_skip,
        request.settings.conf_threshold,
        request.settings.regions.len(),
        profile.name
    );

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || stop_handler.store(true, Ordering::SeqCst))
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let result = {
        let mut progress = ui.frames("Analyse frames", info.total_frames, stop);
        analyze(&mut *source, &mut *detector, &request.settings, &mut progress)?
    };

    let json = serde_json::to_string_pretty(&result)?;
    match &args.json {
        Some(path) => {
            std::fs::write(path, format!("{json}\n"))
                .with_context(|| format!("write {}", path.display()))?;
            eprintln!("    results written to {}", path.display());
        }
        None => println!("{json}"),
    }
    if let Some(path) = &args.csv {
        let csv = render_csv(&result, chrono::Local::now().naive_local());
        std::fs::write(path, csv).with_context(|| format!("write {}", path.display()))?;
        eprintln!("    CSV report written to {}", path.display());
    }
    eprintln!(
        "    {} unique vehicles, {} detections",
        result.counts.total_vehicles,
        result.counts.vehicles_by_type.values().sum::<u64>()
    );
    Ok(())
}
