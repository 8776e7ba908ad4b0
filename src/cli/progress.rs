use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::orchestrator::{DeploymentResult, PipelineObserver, Stage};

/// Tick interval for spinner animation.
const TICK_MS: u64 = 80;

/// Indentation prefix for per-target lines.
const INDENT: &str = "  ";

/// 256-color index for spinner dots (208 = orange).
const SPINNER_COLOR: u8 = 208;

/// One spinner per in-flight target, replaced by a status line when the
/// target finishes.
#[derive(Default)]
pub struct SpinnerObserver {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl SpinnerObserver {
    fn bar(&self, target: &str) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        bars.entry(target.to_string())
            .or_insert_with(|| self.multi.add(create()))
            .clone()
    }
}

impl PipelineObserver for SpinnerObserver {
    fn stage_started(&self, target: &str, stage: Stage) {
        let message = match stage {
            Stage::Packaged => "packaging",
            Stage::Transferred => "uploading",
            Stage::Restarted => "installing and restarting",
            Stage::Verified => "verifying",
        };
        self.bar(target)
            .set_message(format!("{} {}", target.bold(), message.dimmed()));
    }

    fn target_finished(&self, result: &DeploymentResult) {
        let bar = self
            .bars
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&result.target);
        if let Some(bar) = bar {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }

        let mark = if result.success {
            "ok".green()
        } else {
            "failed".red()
        };
        let _ = self
            .multi
            .println(format!("{INDENT}{mark} {} {}", result.target, result.state));
    }
}

fn create() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", " "])
        .template(&format!("{INDENT}{{spinner:.{SPINNER_COLOR}}} {{msg}}"))
    {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(TICK_MS));
    pb
}
