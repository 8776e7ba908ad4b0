//! Error types for the deployment pipeline.
//!
//! The transport and CLI layers work with `anyhow::Result`; everything that
//! crosses a pipeline stage boundary is converted into a [`DeployError`] so the
//! orchestrator can record exactly where a target failed.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("unknown target '{name}' (available: {available} | all)")]
    UnknownTarget { name: String, available: String },

    #[error("source directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("archive I/O error at {}: {source}", .path.display())]
    ArchiveIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("local build step '{command}' failed (exit {exit_code}): {output}")]
    PreSync {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("remote extraction failed (exit {exit_code}): {stderr}")]
    RemoteExtract { exit_code: i32, stderr: String },

    #[error("remote command '{command}' failed (exit {exit_code}): {output}")]
    RemoteCommand {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("cannot reach remote host for verification: {0}")]
    ProbeTransport(String),

    #[error("run was not confirmed")]
    NotConfirmed,

    #[error("configuration error: {0}")]
    Config(String),
}

impl DeployError {
    pub(crate) fn archive_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ArchiveIo {
            path: path.into(),
            source,
        }
    }
}

pub type DeployResult<T> = Result<T, DeployError>;
