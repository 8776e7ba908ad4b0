use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use russh::client::{self, Handle};
use russh::keys::PublicKey;
use russh::{Channel, ChannelMsg};
use tokio::sync::Mutex;

use crate::config::AuthMethod;

use super::auth;

/// Stdin is written to the SSH channel in chunks of this size.
const STDIN_CHUNK_SIZE: usize = 32 * 1024;

/// Interval between SSH keepalive probes.
const KEEPALIVE_INTERVAL_SECS: u64 = 30;

/// Number of missed keepalive responses before declaring the connection dead.
const KEEPALIVE_MAX_FAILURES: usize = 3;

/// Timeout for the TCP connect plus SSH handshake.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Timeout for opening a new SSH channel. If `channel_open_session()` doesn't
/// complete within this time, the connection is considered dead.
const CHANNEL_OPEN_TIMEOUT_SECS: u64 = 10;

/// Parameters needed to establish an SSH connection to the deployment host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity: Option<PathBuf>,
    pub auth_method: AuthMethod,
}

impl ConnectionParams {
    /// `user@host:port`, used as the session cache key and in log lines.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

/// SSH client handler for russh; carries host info for key verification.
pub(super) struct SshHandler {
    host: String,
    port: u16,
}

impl SshHandler {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }
}

impl client::Handler for SshHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        use russh::keys::known_hosts;

        match known_hosts::check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(true) => {
                tracing::debug!("Host key verified for {}:{}", self.host, self.port);
                Ok(true)
            }
            Ok(false) => {
                tracing::info!(
                    "First connection to {}:{}, recording host key in known_hosts",
                    self.host,
                    self.port
                );
                if let Err(e) =
                    known_hosts::learn_known_hosts(&self.host, self.port, server_public_key)
                {
                    tracing::warn!("Failed to save host key to known_hosts: {}", e);
                }
                Ok(true)
            }
            Err(russh::keys::Error::KeyChanged { line }) => Err(anyhow!(
                "Host key for {}:{} does not match known_hosts line {}. \
                 Refusing to deploy. If the host was rebuilt, remove that line \
                 from ~/.ssh/known_hosts and retry.",
                self.host,
                self.port,
                line,
            )),
            Err(e) => {
                tracing::warn!(
                    "Could not verify host key for {}:{}: {}. Accepting.",
                    self.host,
                    self.port,
                    e
                );
                Ok(true)
            }
        }
    }
}

/// Raw byte output collected from a channel.
struct ChannelOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: i32,
}

/// Manages an SSH connection to the deployment host.
pub struct SshConnection {
    session: Arc<Mutex<Handle<SshHandler>>>,
    params: ConnectionParams,
    force_closed: Arc<AtomicBool>,
}

impl SshConnection {
    /// Establish and authenticate a new SSH connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection, SSH handshake, or
    /// authentication fails, or if the handshake exceeds its timeout.
    pub async fn connect(params: ConnectionParams) -> Result<Self> {
        tracing::debug!("Connecting to {}", params.key());

        let config = Arc::new(client::Config {
            keepalive_interval: Some(Duration::from_secs(KEEPALIVE_INTERVAL_SECS)),
            keepalive_max: KEEPALIVE_MAX_FAILURES,
            ..client::Config::default()
        });
        let handler = SshHandler::new(params.host.clone(), params.port);

        let mut session = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            client::connect(config, (params.host.as_str(), params.port), handler),
        )
        .await
        .map_err(|_| anyhow!("Timed out connecting to {} ({CONNECT_TIMEOUT_SECS}s)", params.key()))?
        .with_context(|| format!("Failed to connect to {}", params.key()))?;

        auth::authenticate(&mut session, &params).await?;

        tracing::debug!("SSH connection to {} established", params.key());

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            params,
            force_closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get the connection parameters.
    #[must_use]
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Check whether the underlying SSH session has been closed.
    ///
    /// Returns `true` if the session was explicitly marked dead (e.g. channel
    /// open timeout) or if russh reports the session as closed.
    pub async fn is_closed(&self) -> bool {
        if self.force_closed.load(Ordering::Relaxed) {
            return true;
        }
        let session = self.session.lock().await;
        session.is_closed()
    }

    /// Mark this connection as dead. Subsequent `is_closed()` calls return
    /// `true` without acquiring the session mutex.
    pub fn mark_closed(&self) {
        self.force_closed.store(true, Ordering::Relaxed);
    }

    /// Open a channel and start `command` on it.
    ///
    /// The session mutex is held only for `channel_open_session`; all
    /// subsequent I/O uses the independent `Channel`.
    async fn open_exec(&self, command: &str) -> Result<Channel<client::Msg>> {
        let channel = if let Ok(result) =
            tokio::time::timeout(Duration::from_secs(CHANNEL_OPEN_TIMEOUT_SECS), async {
                let session = self.session.lock().await;
                session
                    .channel_open_session()
                    .await
                    .context("Failed to open channel")
            })
            .await
        {
            result?
        } else {
            tracing::warn!(
                "Channel open timed out after {CHANNEL_OPEN_TIMEOUT_SECS}s, \
                 connection likely dead"
            );
            self.mark_closed();
            return Err(anyhow!(
                "Timed out opening SSH channel ({CHANNEL_OPEN_TIMEOUT_SECS}s)"
            ));
        };

        tracing::debug!(command, "exec");
        channel
            .exec(true, command)
            .await
            .context("Failed to execute command")?;
        Ok(channel)
    }

    /// Execute a command, optionally feeding stdin, and collect all output
    /// within `timeout`.
    async fn run_channel(
        &self,
        command: &str,
        stdin_data: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<ChannelOutput> {
        let mut channel = self.open_exec(command).await?;

        if let Some(data) = stdin_data {
            for chunk in data.chunks(STDIN_CHUNK_SIZE) {
                channel
                    .data(chunk)
                    .await
                    .context("Failed to write to stdin")?;
            }
            channel.eof().await.context("Failed to send EOF")?;
        }

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        let read_loop = async {
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                    Some(ChannelMsg::ExtendedData { data, ext }) => {
                        if ext == 1 {
                            stderr.extend_from_slice(&data);
                        }
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = Some(exit_status.cast_signed());
                    }
                    None => break,
                    _ => {}
                }
            }
        };

        tokio::time::timeout(timeout, read_loop)
            .await
            .map_err(|_| anyhow!("Command timed out after {}s", timeout.as_secs()))?;

        Ok(ChannelOutput {
            stdout,
            stderr,
            exit_code: exit_code.unwrap_or(-1),
        })
    }

    /// Execute a command on the remote machine.
    ///
    /// # Errors
    /// Returns an error if the SSH channel cannot be opened, the command
    /// fails to start, or the timeout expires.
    pub async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecResult> {
        let output = self.run_channel(command, None, timeout).await?;
        Ok(ExecResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.exit_code,
        })
    }

    /// Execute a command with `stdin_data` piped to it.
    ///
    /// # Errors
    /// Returns an error if the SSH channel cannot be opened, stdin data
    /// fails to write, or the timeout expires.
    pub async fn exec_with_stdin(
        &self,
        command: &str,
        stdin_data: &[u8],
        timeout: Duration,
    ) -> Result<ExecResult> {
        let output = self.run_channel(command, Some(stdin_data), timeout).await?;
        Ok(ExecResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.exit_code,
        })
    }

    /// Execute a long-running command, handing stdout/stderr chunks to `sink`
    /// as they arrive. Returns the exit code once the channel closes.
    ///
    /// # Errors
    /// Returns an error if the SSH channel cannot be opened or the command
    /// fails to start.
    pub async fn exec_streaming<F>(&self, command: &str, mut sink: F) -> Result<i32>
    where
        F: FnMut(&[u8]),
    {
        let mut channel = self.open_exec(command).await?;
        let mut exit_code = None;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data } | ChannelMsg::ExtendedData { data, .. }) => {
                    sink(&data);
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = Some(exit_status.cast_signed());
                }
                None => break,
                _ => {}
            }
        }

        Ok(exit_code.unwrap_or(-1))
    }
}

/// Result of executing a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecResult {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout and stderr joined, trimmed, for error reports.
    #[must_use]
    pub fn combined_output(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, _) => stderr.to_string(),
            (false, true) => stdout.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }
}
