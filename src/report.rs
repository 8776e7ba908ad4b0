//! Run summary: aggregate verdict, human-readable table, JSON.

use std::fmt::Write;

use colored::Colorize;
use serde::Serialize;

use crate::executor::StepOutcome;
use crate::health::{ProbeOutcome, ProbeStatus};
use crate::orchestrator::{DeploymentResult, Mode, PipelineState};

/// Every target's result for one invocation, in selection order.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: Mode,
    pub success: bool,
    pub summary: String,
    pub results: Vec<DeploymentResult>,
}

impl RunReport {
    #[must_use]
    pub fn new(mode: Mode, results: Vec<DeploymentResult>) -> Self {
        let success = results.iter().all(|r| r.success);
        let summary = summarize(&results);
        Self {
            mode,
            success,
            summary,
            results,
        }
    }

    /// Ids of targets that did not succeed.
    #[must_use]
    pub fn failed_targets(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.target.as_str())
            .collect()
    }

    /// # Errors
    /// Only if serialization fails, which the result types do not do.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Colored multi-line rendering for a terminal.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for result in &self.results {
            render_result(&mut out, result);
        }
        let summary = if self.success {
            self.summary.green().bold()
        } else {
            self.summary.red().bold()
        };
        let _ = writeln!(out, "{summary}");
        out
    }
}

/// `all succeeded` or `N of M succeeded, failed: [a, b]`. A run with no
/// targets has nothing to fail.
#[must_use]
pub fn summarize(results: &[DeploymentResult]) -> String {
    if results.is_empty() {
        return "no targets selected".to_string();
    }
    let failed: Vec<&str> = results
        .iter()
        .filter(|r| !r.success)
        .map(|r| r.target.as_str())
        .collect();
    if failed.is_empty() {
        return "all succeeded".to_string();
    }
    format!(
        "{} of {} succeeded, failed: [{}]",
        results.len() - failed.len(),
        results.len(),
        failed.join(", ")
    )
}

fn render_result(out: &mut String, result: &DeploymentResult) {
    let state = result.state.to_string();
    let state = match result.state {
        PipelineState::Reached(_) if result.success => state.green(),
        PipelineState::Reached(_) | PipelineState::Pending => state.yellow(),
        PipelineState::Failed(_) | PipelineState::Interrupted => state.red(),
    };
    let _ = writeln!(out, "{} {}", result.target.bold(), state);

    for step in &result.steps {
        render_step(out, step);
    }
    for probe in &result.probe_report {
        render_probe(out, probe);
    }
    if let Some(error) = &result.error {
        let _ = writeln!(out, "  {} {}", "error".red(), error);
    }
    out.push('\n');
}

fn render_step(out: &mut String, step: &StepOutcome) {
    let mark = if step.succeeded() {
        "ok".green()
    } else {
        "failed".red()
    };
    let _ = writeln!(out, "  {mark} {}", step.step);
    if !step.succeeded() && !step.output.trim().is_empty() {
        for line in step.output.trim().lines().rev().take(5).collect::<Vec<_>>().into_iter().rev() {
            let _ = writeln!(out, "      {}", line.dimmed());
        }
    }
}

fn render_probe(out: &mut String, probe: &ProbeOutcome) {
    let mark = match probe.status {
        ProbeStatus::Passed => "pass".green(),
        ProbeStatus::Failed => "fail".red(),
        ProbeStatus::Skipped => "skip".dimmed(),
    };
    let mut lines = probe.detail.lines();
    let first = lines.next().unwrap_or_default();
    let _ = writeln!(out, "  {mark} {:<16} {}", probe.name.as_str(), first);
    for line in lines {
        let _ = writeln!(out, "  {:<21} {}", "", line.dimmed());
    }
}
