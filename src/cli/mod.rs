mod confirm;
mod list;
mod logs;
mod pipeline;
mod progress;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use crate::config::DeployConfig;
use crate::orchestrator::Mode;
use crate::registry::{TargetRegistry, ALL};

/// Deploy and health-check services on a single SSH host
#[derive(Parser, Debug)]
#[command(name = "deploy-hub")]
#[command(version, about)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Path to the deployment config (default: ./deploy-hub.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Print the run report as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Package, upload, install, restart and verify
    Deploy {
        /// Target id, or "all"
        target: String,

        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Restart services and verify them
    Restart {
        /// Target id, or "all"
        target: String,

        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Run health probes only
    Status {
        /// Target id, or "all"
        #[arg(default_value = ALL)]
        target: String,
    },

    /// Show service journal output
    Logs {
        /// Target id
        target: String,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,

        /// Keep streaming new lines
        #[arg(short = 'f', long)]
        follow: bool,

        /// Only show entries newer than this (journalctl --since syntax)
        #[arg(long)]
        since: Option<String>,
    },

    /// List configured targets
    List,
}

/// Loaded configuration shared by every command.
pub(crate) struct Context {
    pub config: DeployConfig,
    pub registry: TargetRegistry,
    pub json: bool,
}

impl Context {
    fn load(cli: &Cli) -> Result<Self> {
        let config = DeployConfig::load(cli.config.as_deref())?;
        let registry = config.registry()?;
        Ok(Self {
            config,
            registry,
            json: cli.json,
        })
    }
}

/// Dispatch a CLI command to its handler.
///
/// Returns `Ok(false)` when the command ran but at least one target failed.
///
/// # Errors
///
/// Returns an error for usage problems: unreadable config, unknown target,
/// unreachable host for `logs`.
pub async fn run(cli: Cli, interrupt: watch::Receiver<bool>) -> Result<bool> {
    let ctx = Context::load(&cli)?;

    match cli.command {
        Command::Deploy { target, yes } => {
            pipeline::run(&ctx, Mode::Deploy, &target, yes, interrupt).await
        }
        Command::Restart { target, yes } => {
            pipeline::run(&ctx, Mode::Restart, &target, yes, interrupt).await
        }
        Command::Status { target } => {
            pipeline::run(&ctx, Mode::Status, &target, true, interrupt).await
        }
        Command::Logs {
            target,
            lines,
            follow,
            since,
        } => logs::run(&ctx, &target, lines, follow, since, interrupt).await,
        Command::List => {
            list::run(&ctx)?;
            Ok(true)
        }
    }
}
