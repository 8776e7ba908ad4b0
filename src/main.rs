use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use deploy_hub::cli::{self, Cli};

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Exit status for a run abandoned by a second Ctrl-C.
const FORCED_EXIT: i32 = 130;

#[derive(Debug, PartialEq, Eq)]
enum OnInterrupt {
    /// Let running commands finish, start nothing new.
    Graceful,
    Force,
}

fn on_interrupt(presses: u32) -> OnInterrupt {
    if presses <= 1 {
        OnInterrupt::Graceful
    } else {
        OnInterrupt::Force
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Ctrl-C stops new stages from starting; running commands finish.
    // A second Ctrl-C exits immediately.
    let (interrupt_tx, interrupt_rx) = watch::channel(false);
    tokio::spawn(async move {
        let mut presses = 0;
        while tokio::signal::ctrl_c().await.is_ok() {
            presses += 1;
            match on_interrupt(presses) {
                OnInterrupt::Graceful => {
                    tracing::warn!("Interrupt received, finishing current steps (Ctrl-C again to force)");
                    interrupt_tx.send_replace(true);
                }
                OnInterrupt::Force => {
                    eprintln!("{}", "Forced exit.".red().bold());
                    std::process::exit(FORCED_EXIT);
                }
            }
        }
        // Hold the sender so receivers never see it closed.
        std::future::pending::<()>().await;
    });

    match cli::run(cli, interrupt_rx).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_interrupt_forces_exit() {
        assert_eq!(on_interrupt(1), OnInterrupt::Graceful);
        assert_eq!(on_interrupt(2), OnInterrupt::Force);
        assert_eq!(on_interrupt(5), OnInterrupt::Force);
    }
}
