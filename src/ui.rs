use datatrack::pipeline::AnalysisObserver;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Frame progress for an analysis run, shown as its own stage: the bar
    /// takes the place of the stage spinner. `stop` is polled between
    /// sampled frames (wired to Ctrl-C by the caller).
    pub fn frames(&self, name: &str, total: u64, stop: Arc<AtomicBool>) -> FrameProgress {
        let bar = if self.use_pretty() {
            let bar = if total > 0 {
                ProgressBar::new(total)
            } else {
                ProgressBar::new_spinner()
            };
            bar.set_draw_target(ProgressDrawTarget::stderr());
            let style = ProgressStyle::with_template(
                "{spinner} {prefix} [{elapsed_precise}] {bar:40} {pos}/{len} frames ({eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar());
            bar.set_style(style);
            bar.set_prefix(name.to_string());
            Some(bar)
        } else {
            eprintln!("==> {}", name);
            None
        };
        FrameProgress {
            name: name.to_string(),
            start: Instant::now(),
            bar,
            stop,
            last_decile: 0,
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let message = stage_done(&self.name, self.start);
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

pub struct FrameProgress {
    name: String,
    start: Instant,
    bar: Option<ProgressBar>,
    stop: Arc<AtomicBool>,
    last_decile: u64,
}

impl AnalysisObserver for FrameProgress {
    fn progress(&mut self, processed: u64, total: u64) {
        match &self.bar {
            Some(bar) => bar.set_position(processed),
            None if total > 0 => {
                let decile = processed.saturating_mul(10) / total;
                if decile > self.last_decile {
                    self.last_decile = decile;
                    eprintln!("    {}% ({}/{} frames)", decile * 10, processed, total);
                }
            }
            None => {}
        }
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

impl Drop for FrameProgress {
    fn drop(&mut self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
        eprintln!("{}", stage_done(&self.name, self.start));
    }
}

fn stage_done(name: &str, start: Instant) -> String {
    format!("✔ {} ({})", name, format_duration(start.elapsed()))
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_frames_have_no_bar() {
        let ui = Ui::new(UiMode::Plain, true, false);
        let stop = Arc::new(AtomicBool::new(false));
        let mut progress = ui.frames("Analyse frames", 100, stop.clone());
        assert!(progress.bar.is_none());
        assert_eq!(progress.name, "Analyse frames");

        progress.progress(25, 100);
        assert_eq!(progress.last_decile, 2);
        progress.progress(20, 100);
        assert_eq!(progress.last_decile, 2);
        progress.progress(7, 0);
        assert_eq!(progress.last_decile, 2);

        assert!(!progress.should_stop());
        stop.store(true, Ordering::SeqCst);
        assert!(progress.should_stop());
    }

    #[test]
    fn pretty_needs_a_terminal() {
        assert!(!Ui::new(UiMode::Pretty, false, false).use_pretty());
        assert!(Ui::new(UiMode::Auto, true, false).use_pretty());
        assert!(!Ui::new(UiMode::Auto, true, true).use_pretty());
        assert!(!Ui::from_args(Some("plain"), true, false).use_pretty());
    }

    #[test]
    fn durations_are_compact() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
