//! Moving a packaged archive onto the remote host.
//!
//! Extraction is an additive merge: files in the archive overwrite their
//! remote counterparts, and remote-only files (databases, logs, virtualenvs)
//! are left alone. Nothing is ever deleted remotely, so a file removed
//! locally stays on the server.

use std::fmt::Write;
use std::time::Duration;

use crate::archive::Archive;
use crate::error::{DeployError, DeployResult};
use crate::transport::RemoteTransport;
use crate::utils::path::{join_remote, shell_escape_remote_path};

/// Remote staging directory for uploaded archives.
const REMOTE_STAGING_DIR: &str = "/tmp";

/// Temporary remote path the archive is uploaded to:
/// `/tmp/deploy_<target>_<nonce>.tar.gz`, distinct per target and per run.
#[must_use]
pub fn remote_archive_path(target_id: &str, archive: &Archive) -> String {
    join_remote(
        REMOTE_STAGING_DIR,
        &format!("deploy_{target_id}_{}.tar.gz", archive.nonce()),
    )
}

/// Shell command that extracts `remote_archive` into `remote_path`, creates
/// `ensure_dirs`, and always removes the uploaded archive. Exits with the
/// extraction status.
#[must_use]
pub fn extract_command(remote_archive: &str, remote_path: &str, ensure_dirs: &[String]) -> String {
    let archive = shell_escape_remote_path(remote_archive);
    let dest = shell_escape_remote_path(remote_path);

    let mut cmd = format!("mkdir -p {dest} && tar -xzf {archive} -C {dest}");
    for dir in ensure_dirs {
        let full = join_remote(remote_path, dir);
        let _ = write!(cmd, " && mkdir -p {}", shell_escape_remote_path(&full));
    }
    format!("{cmd}; rc=$?; rm -f {archive}; exit $rc")
}

/// Upload `archive` for `target_id` and extract it into `remote_path`.
///
/// No rollback is attempted: if extraction fails part-way, the remote tree
/// is left as it is and the error says so.
///
/// # Errors
/// [`DeployError::Transfer`] if the upload fails, [`DeployError::RemoteExtract`]
/// if extraction exits nonzero or cannot be run.
pub async fn send(
    transport: &dyn RemoteTransport,
    target_id: &str,
    archive: &Archive,
    remote_path: &str,
    ensure_dirs: &[String],
    timeout: Duration,
) -> DeployResult<()> {
    let remote_archive = remote_archive_path(target_id, archive);

    tracing::debug!(
        "Uploading {} ({} bytes) to {}",
        archive.file_name(),
        archive.size_bytes(),
        remote_archive
    );
    transport
        .copy(archive.path(), &remote_archive, timeout)
        .await
        .map_err(|e| DeployError::Transfer(format!("{e:#}")))?;

    let command = extract_command(&remote_archive, remote_path, ensure_dirs);
    let result = transport
        .execute(&command, timeout)
        .await
        .map_err(|e| DeployError::RemoteExtract {
            exit_code: -1,
            stderr: format!("{e:#} (remote tree at {remote_path} may be partially updated)"),
        })?;

    if result.exit_code != 0 {
        return Err(DeployError::RemoteExtract {
            exit_code: result.exit_code,
            stderr: format!(
                "{} (remote tree at {remote_path} may be partially updated)",
                result.stderr.trim()
            ),
        });
    }

    tracing::debug!("Extracted into {}", remote_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_command_is_additive_and_cleans_up() {
        let cmd = extract_command(
            "/tmp/deploy_app.tar.gz",
            "/home/ec2-user/app",
            &["data".to_string()],
        );
        assert_eq!(
            cmd,
            "mkdir -p '/home/ec2-user/app' && tar -xzf '/tmp/deploy_app.tar.gz' -C '/home/ec2-user/app' \
             && mkdir -p '/home/ec2-user/app/data'; rc=$?; rm -f '/tmp/deploy_app.tar.gz'; exit $rc"
        );
        assert!(!cmd.contains("rm -rf"));
        assert!(!cmd.contains("--delete"));
    }

    #[test]
    fn extract_command_keeps_tilde_expandable() {
        let cmd = extract_command("/tmp/a.tar.gz", "~/apps/bingo", &[]);
        assert!(cmd.starts_with("mkdir -p ~/'apps/bingo' && tar"));
    }
}
