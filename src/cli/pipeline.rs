use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use tokio::sync::watch;

use super::{confirm, progress, Context};
use crate::error::{DeployError, DeployResult};
use crate::health::HealthVerifier;
use crate::orchestrator::{DeploymentRun, Mode, NoopObserver, Orchestrator, PipelineObserver};
use crate::transport::SshTransport;

/// Run `mode` against `target` (an id or `all`) and print the report.
pub async fn run(
    ctx: &Context,
    mode: Mode,
    target: &str,
    yes: bool,
    interrupt: watch::Receiver<bool>,
) -> Result<bool> {
    let targets = ctx.registry.resolve(target)?;

    let params = ctx.config.connection_params();
    let confirmed = yes || !mode.is_mutating() || confirm::ask(mode, &targets, &params.key())?;

    let observer: Arc<dyn PipelineObserver> = if ctx.json {
        Arc::new(NoopObserver)
    } else {
        Arc::new(progress::SpinnerObserver::default())
    };
    let orchestrator = Orchestrator::new(
        Arc::new(SshTransport::new(params)),
        HealthVerifier::new(ctx.config.log_lines)?,
        ctx.config.pipeline_settings(),
    )
    .with_interrupt(interrupt)
    .with_observer(observer);

    let mut run = DeploymentRun::new(mode, targets, confirmed);
    if started(orchestrator.execute(&mut run).await)? == Started::Declined {
        // Declining at the prompt exits cleanly.
        println!("{}", "Deployment cancelled.".yellow());
        return Ok(true);
    }

    let report = run.into_report();
    if ctx.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render());
    }
    Ok(report.success)
}

#[derive(Debug, PartialEq, Eq)]
enum Started {
    Ran,
    Declined,
}

fn started(outcome: DeployResult<()>) -> Result<Started> {
    match outcome {
        Ok(()) => Ok(Started::Ran),
        Err(DeployError::NotConfirmed) => Ok(Started::Declined),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declined_confirmation_is_not_an_error() {
        assert_eq!(started(Err(DeployError::NotConfirmed)).unwrap(), Started::Declined);
        assert_eq!(started(Ok(())).unwrap(), Started::Ran);
    }

    #[test]
    fn other_errors_propagate() {
        let err = started(Err(DeployError::Config("bad".into()))).unwrap_err();
        assert!(err.to_string().contains("bad"));
    }
}
