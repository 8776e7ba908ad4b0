//! The two remote operations the pipeline depends on, and their SSH
//! implementation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::connection::{ConnectionParams, ExecResult, SessionCache, SshConnection};

/// Timeout for the connectivity check run before probes.
const CONNECTION_CHECK_TIMEOUT: Duration = Duration::from_secs(15);

/// Remote host access as seen by the pipeline.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Run `command` through the remote shell.
    ///
    /// A nonzero exit is a normal `Ok` result; `Err` means the command could
    /// not be run or did not finish within `timeout`.
    async fn execute(&self, command: &str, timeout: Duration) -> Result<ExecResult>;

    /// Copy a local file to `remote_path` on the host.
    async fn copy(&self, local_file: &Path, remote_path: &str, timeout: Duration) -> Result<()>;

    /// Make sure a usable, authenticated session exists.
    async fn check_connection(&self) -> Result<()>;
}

/// [`RemoteTransport`] over a cached russh session.
pub struct SshTransport {
    params: ConnectionParams,
    sessions: SessionCache,
}

impl SshTransport {
    #[must_use]
    pub fn new(params: ConnectionParams) -> Self {
        Self {
            params,
            sessions: SessionCache::new(),
        }
    }

    #[must_use]
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// The live session, connecting (or reconnecting) if needed.
    ///
    /// # Errors
    /// Returns the connection or authentication error.
    pub async fn session(&self) -> Result<Arc<SshConnection>> {
        self.sessions.get_or_connect(&self.params).await
    }

    /// Drop `conn` from the cache if it died under us, so the next call
    /// reconnects instead of reusing it.
    async fn evict_if_closed(&self, conn: &Arc<SshConnection>) {
        if conn.is_closed().await {
            self.sessions.evict(&self.params.key(), conn).await;
        }
    }
}

#[async_trait]
impl RemoteTransport for SshTransport {
    async fn execute(&self, command: &str, timeout: Duration) -> Result<ExecResult> {
        let conn = self.session().await?;
        let result = conn.exec(command, timeout).await;
        if result.is_err() {
            self.evict_if_closed(&conn).await;
        }
        result
    }

    async fn copy(&self, local_file: &Path, remote_path: &str, timeout: Duration) -> Result<()> {
        let conn = self.session().await?;
        let result = conn.upload_file(local_file, remote_path, timeout).await;
        if result.is_err() {
            self.evict_if_closed(&conn).await;
        }
        result
    }

    async fn check_connection(&self) -> Result<()> {
        let result = self.execute("echo ok", CONNECTION_CHECK_TIMEOUT).await?;
        if result.exit_code == 0 && result.stdout.contains("ok") {
            Ok(())
        } else {
            Err(anyhow!(
                "Connection check on {} failed (exit {}): {}",
                self.params.key(),
                result.exit_code,
                result.stderr.trim()
            ))
        }
    }
}
