//! File transfer convenience methods for [`SshConnection`].

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::utils::path::shell_escape_remote_path;

use super::SshConnection;

impl SshConnection {
    /// Upload a local file to `remote_path`, replacing it if present.
    ///
    /// The bytes are piped through `cat` on stdin, which avoids needing an
    /// SFTP subsystem on the host.
    ///
    /// # Errors
    /// Returns an error if the local file cannot be read, the remote write
    /// exits nonzero, or the timeout expires.
    pub async fn upload_file(
        &self,
        local_file: &Path,
        remote_path: &str,
        timeout: Duration,
    ) -> Result<()> {
        let content = tokio::fs::read(local_file)
            .await
            .with_context(|| format!("Failed to read {}", local_file.display()))?;

        tracing::debug!(
            "Uploading {} ({} bytes) to {}",
            local_file.display(),
            content.len(),
            remote_path
        );

        let command = format!("cat > {}", shell_escape_remote_path(remote_path));
        let result = self.exec_with_stdin(&command, &content, timeout).await?;
        if result.exit_code != 0 {
            return Err(anyhow!(
                "Remote write to {} failed (exit {}): {}",
                remote_path,
                result.exit_code,
                result.stderr.trim()
            ));
        }
        Ok(())
    }
}
