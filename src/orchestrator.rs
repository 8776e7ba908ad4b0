//! Per-target deployment pipeline and multi-target aggregation.
//!
//! Each target walks `Pending → Packaged → Transferred → Restarted →
//! Verified`, or stops in `Failed(stage)` / `Interrupted`. Targets are
//! independent: a failure is recorded in that target's result and the run
//! moves on.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::watch;

use crate::archive::{self, Archive};
use crate::error::{DeployError, DeployResult};
use crate::executor::{self, StepOutcome};
use crate::health::{HealthVerifier, ProbeName, ProbeOutcome, ProbeStatus};
use crate::report::RunReport;
use crate::target::{RemoteStep, TargetDescriptor};
use crate::transfer;
use crate::transport::RemoteTransport;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Packaged,
    Transferred,
    Restarted,
    Verified,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Packaged => "packaged",
            Self::Transferred => "transferred",
            Self::Restarted => "restarted",
            Self::Verified => "verified",
        })
    }
}

/// Where a target's pipeline ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Pending,
    Reached(Stage),
    /// The stage that was being attempted when it failed.
    Failed(Stage),
    Interrupted,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("PENDING"),
            Self::Reached(stage) => write!(f, "{}", stage.to_string().to_uppercase()),
            Self::Failed(stage) => write!(f, "FAILED({stage})"),
            Self::Interrupted => f.write_str("FAILED(interrupted)"),
        }
    }
}

/// Which part of the pipeline an invocation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Package, transfer, install/restart, verify.
    Deploy,
    /// Restart steps, then verify.
    Restart,
    /// Verify only; read-only.
    Status,
}

impl Mode {
    #[must_use]
    pub fn stages(self) -> &'static [Stage] {
        match self {
            Self::Deploy => &[
                Stage::Packaged,
                Stage::Transferred,
                Stage::Restarted,
                Stage::Verified,
            ],
            Self::Restart => &[Stage::Restarted, Stage::Verified],
            Self::Status => &[Stage::Verified],
        }
    }

    /// Whether the run changes the remote host and so needs confirmation.
    #[must_use]
    pub fn is_mutating(self) -> bool {
        !matches!(self, Self::Status)
    }
}

/// Final outcome for one target.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentResult {
    pub target: String,
    pub state: PipelineState,
    /// Last stage completed, if any.
    pub stage_reached: Option<Stage>,
    pub success: bool,
    pub steps: Vec<StepOutcome>,
    pub probe_report: Vec<ProbeOutcome>,
    pub error: Option<String>,
}

impl DeploymentResult {
    fn pending(target: &str) -> Self {
        Self {
            target: target.to_string(),
            state: PipelineState::Pending,
            stage_reached: None,
            success: false,
            steps: Vec::new(),
            probe_report: Vec::new(),
            error: None,
        }
    }

    fn reach(&mut self, stage: Stage) {
        debug_assert!(self.stage_reached.is_none_or(|prev| prev < stage));
        self.state = PipelineState::Reached(stage);
        self.stage_reached = Some(stage);
    }
}

/// Observer for progress display. All methods default to no-ops.
pub trait PipelineObserver: Send + Sync {
    fn stage_started(&self, _target: &str, _stage: Stage) {}
    fn target_finished(&self, _result: &DeploymentResult) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Tunables taken from the configuration.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub concurrency: usize,
    pub settle_delay: Duration,
    pub command_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            concurrency: 2,
            settle_delay: Duration::from_secs(2),
            command_timeout: Duration::from_secs(120),
        }
    }
}

/// One invocation against one or more targets.
pub struct DeploymentRun<'r> {
    pub mode: Mode,
    pub targets: Vec<&'r TargetDescriptor>,
    pub confirmed: bool,
    results: Vec<DeploymentResult>,
}

impl<'r> DeploymentRun<'r> {
    #[must_use]
    pub fn new(mode: Mode, targets: Vec<&'r TargetDescriptor>, confirmed: bool) -> Self {
        Self {
            mode,
            targets,
            confirmed,
            results: Vec::new(),
        }
    }

    /// Results so far, in target selection order.
    #[must_use]
    pub fn results(&self) -> &[DeploymentResult] {
        &self.results
    }

    #[must_use]
    pub fn into_report(self) -> RunReport {
        RunReport::new(self.mode, self.results)
    }
}

/// Why a target's pipeline stopped early.
enum Halt {
    Failed(Stage, DeployError),
    Interrupted,
}

/// Drives targets through the pipeline.
pub struct Orchestrator {
    transport: Arc<dyn RemoteTransport>,
    verifier: HealthVerifier,
    settings: PipelineSettings,
    interrupt: Option<watch::Receiver<bool>>,
    observer: Arc<dyn PipelineObserver>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        verifier: HealthVerifier,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            transport,
            verifier,
            settings,
            interrupt: None,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Stop starting new stages once the flag becomes `true`.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: watch::Receiver<bool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run every selected target and store one result per target.
    ///
    /// # Errors
    /// [`DeployError::NotConfirmed`] if a mutating run was not confirmed.
    /// Per-target failures are never returned here; they are in the results.
    pub async fn execute(&self, run: &mut DeploymentRun<'_>) -> DeployResult<()> {
        if run.mode.is_mutating() && !run.confirmed {
            return Err(DeployError::NotConfirmed);
        }

        let mode = run.mode;
        let concurrency = self.settings.concurrency.max(1);
        tracing::info!(
            "Starting {:?} of {} target(s), concurrency {}",
            mode,
            run.targets.len(),
            concurrency
        );

        run.results = stream::iter(run.targets.iter().copied())
            .map(|target| self.run_target(mode, target))
            .buffered(concurrency)
            .collect()
            .await;
        Ok(())
    }

    async fn run_target(&self, mode: Mode, target: &TargetDescriptor) -> DeploymentResult {
        let mut result = DeploymentResult::pending(&target.id);

        match self.drive(mode, target, &mut result).await {
            Ok(()) => {}
            Err(Halt::Failed(stage, err)) => {
                tracing::warn!("{}: failed at {}: {}", target.id, stage, err);
                result.state = PipelineState::Failed(stage);
                result.success = false;
                result.error = Some(err.to_string());
            }
            Err(Halt::Interrupted) => {
                tracing::warn!("{}: interrupted", target.id);
                result.state = PipelineState::Interrupted;
                result.success = false;
                result.error = Some("interrupted".to_string());
            }
        }

        self.observer.target_finished(&result);
        result
    }

    async fn drive(
        &self,
        mode: Mode,
        target: &TargetDescriptor,
        result: &mut DeploymentResult,
    ) -> Result<(), Halt> {
        let mut archive: Option<Archive> = None;

        for &stage in mode.stages() {
            if self.interrupted() {
                return Err(Halt::Interrupted);
            }
            self.observer.stage_started(&target.id, stage);
            tracing::info!("{}: {}", target.id, stage_verb(stage));

            match stage {
                Stage::Packaged => {
                    archive = Some(self.package(target).await.map_err(|e| Halt::Failed(stage, e))?);
                }
                Stage::Transferred => {
                    // Taking the archive here drops it (and its temp dir) after upload.
                    let Some(packed) = archive.take() else {
                        return Err(Halt::Failed(
                            stage,
                            DeployError::Transfer("no archive was produced".to_string()),
                        ));
                    };
                    transfer::send(
                        self.transport.as_ref(),
                        &target.id,
                        &packed,
                        &target.remote_path,
                        &target.ensure_dirs,
                        self.settings.command_timeout,
                    )
                    .await
                    .map_err(|e| Halt::Failed(stage, e))?;
                }
                Stage::Restarted => {
                    let steps: Vec<&RemoteStep> = match mode {
                        Mode::Restart => target.restart_steps().collect(),
                        Mode::Deploy | Mode::Status => target.restart_commands.iter().collect(),
                    };
                    self.restart(&steps, result).await?;
                }
                Stage::Verified => {
                    let report = self
                        .verifier
                        .verify(self.transport.as_ref(), target)
                        .await
                        .map_err(|e| Halt::Failed(stage, e))?;
                    result.success = report.success;
                    if !report.success {
                        let failed: Vec<&str> = report
                            .probes
                            .iter()
                            .filter(|p| p.status == ProbeStatus::Failed)
                            .filter(|p| p.name != ProbeName::RecentLogs)
                            .map(|p| p.name.as_str())
                            .collect();
                        result.error = Some(format!("health check failed: {}", failed.join(", ")));
                    }
                    result.probe_report = report.probes;
                }
            }

            result.reach(stage);
        }

        Ok(())
    }

    async fn package(&self, target: &TargetDescriptor) -> DeployResult<Archive> {
        if !target.local_path.is_dir() {
            return Err(DeployError::SourceNotFound(target.local_path.clone()));
        }
        archive::run_local_steps(&target.pre_sync, self.settings.command_timeout).await?;

        let local_path = target.local_path.clone();
        let exclusions = target.exclusions.clone();
        let packed = tokio::task::spawn_blocking(move || archive::build(&local_path, &exclusions))
            .await
            .map_err(|e| DeployError::archive_io(&target.local_path, std::io::Error::other(e)))??;

        tracing::info!(
            "{}: packaged {} entries ({} KB)",
            target.id,
            packed.entries().len(),
            packed.size_bytes() / 1024
        );
        Ok(packed)
    }

    async fn restart(&self, steps: &[&RemoteStep], result: &mut DeploymentResult) -> Result<(), Halt> {
        let outcomes = executor::run_sequence(
            self.transport.as_ref(),
            steps.iter().copied(),
            self.settings.command_timeout,
            self.interrupt.as_ref(),
        )
        .await;
        let attempted = outcomes.len();
        result.steps = outcomes;

        executor::check(&result.steps).map_err(|e| Halt::Failed(Stage::Restarted, e))?;
        if attempted < steps.len() {
            return Err(Halt::Interrupted);
        }

        if !self.settings.settle_delay.is_zero() {
            tokio::time::sleep(self.settings.settle_delay).await;
        }
        Ok(())
    }

    fn interrupted(&self) -> bool {
        self.interrupt.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

fn stage_verb(stage: Stage) -> &'static str {
    match stage {
        Stage::Packaged => "packaging",
        Stage::Transferred => "transferring",
        Stage::Restarted => "installing and restarting",
        Stage::Verified => "verifying",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display() {
        assert_eq!(PipelineState::Pending.to_string(), "PENDING");
        assert_eq!(PipelineState::Reached(Stage::Verified).to_string(), "VERIFIED");
        assert_eq!(PipelineState::Failed(Stage::Packaged).to_string(), "FAILED(packaged)");
        assert_eq!(PipelineState::Interrupted.to_string(), "FAILED(interrupted)");
    }

    #[test]
    fn mode_stages_are_ordered() {
        for mode in [Mode::Deploy, Mode::Restart, Mode::Status] {
            let stages = mode.stages();
            assert!(stages.windows(2).all(|w| w[0] < w[1]));
            assert_eq!(stages.last(), Some(&Stage::Verified));
        }
        assert!(!Mode::Status.is_mutating());
        assert!(Mode::Restart.is_mutating());
    }
}
