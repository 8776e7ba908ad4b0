//! Fail-fast execution of a target's remote steps.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use crate::error::{DeployError, DeployResult};
use crate::target::RemoteStep;
use crate::transport::RemoteTransport;

/// Exit code recorded when a step could not be run at all.
pub const TRANSPORT_FAILURE_EXIT: i32 = -1;

/// What happened when one step ran.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: String,
    pub command: String,
    pub exit_code: i32,
    pub output: String,
}

impl StepOutcome {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run `steps` in order, stopping after the first nonzero exit.
///
/// The returned outcomes are exactly the steps attempted. A step that cannot
/// be run (connection lost, timeout) is recorded with exit code
/// [`TRANSPORT_FAILURE_EXIT`] and also ends the sequence. When `interrupt`
/// is set between steps, the remaining steps are not started.
pub async fn run_sequence<'a, I>(
    transport: &dyn RemoteTransport,
    steps: I,
    timeout: Duration,
    interrupt: Option<&watch::Receiver<bool>>,
) -> Vec<StepOutcome>
where
    I: IntoIterator<Item = &'a RemoteStep>,
{
    let mut outcomes = Vec::new();

    for step in steps {
        if interrupt.is_some_and(|rx| *rx.borrow()) {
            tracing::debug!("Interrupted before step '{}'", step.name);
            break;
        }

        tracing::info!("Running step '{}'", step.name);
        let outcome = match transport.execute(&step.command, timeout).await {
            Ok(result) => StepOutcome {
                step: step.name.clone(),
                command: step.command.clone(),
                exit_code: result.exit_code,
                output: result.combined_output(),
            },
            Err(e) => StepOutcome {
                step: step.name.clone(),
                command: step.command.clone(),
                exit_code: TRANSPORT_FAILURE_EXIT,
                output: format!("{e:#}"),
            },
        };

        let failed = !outcome.succeeded();
        if failed {
            tracing::warn!(
                "Step '{}' failed with exit code {}",
                outcome.step,
                outcome.exit_code
            );
        }
        outcomes.push(outcome);
        if failed {
            break;
        }
    }

    outcomes
}

/// Turn the first failed outcome into a [`DeployError::RemoteCommand`].
///
/// # Errors
/// Returns the failing step's command, exit code and output.
pub fn check(outcomes: &[StepOutcome]) -> DeployResult<()> {
    match outcomes.iter().find(|o| !o.succeeded()) {
        Some(failed) => Err(DeployError::RemoteCommand {
            command: failed.command.clone(),
            exit_code: failed.exit_code,
            output: failed.output.clone(),
        }),
        None => Ok(()),
    }
}
