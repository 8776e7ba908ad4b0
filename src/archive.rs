//! Packaging a local application tree into a transient `.tar.gz`.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;

use crate::error::{DeployError, DeployResult};
use crate::exclude::ExclusionSet;
use crate::target::LocalStep;
use crate::utils::path::to_slash_relative;

const TEMP_PREFIX: &str = "deploy-hub-";

/// A packaged tree in a private temporary directory.
///
/// The directory (and the archive in it) is deleted when this value is
/// dropped, whichever way the pipeline ends.
#[derive(Debug)]
pub struct Archive {
    dir: TempDir,
    path: PathBuf,
    entries: Vec<String>,
    size_bytes: u64,
}

impl Archive {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Archive file name, e.g. `deploy_taskschedule.tar.gz`.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Relative paths of every entry, in archive order.
    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Random suffix of the private temp directory; unique per build.
    #[must_use]
    pub fn nonce(&self) -> String {
        self.dir
            .path()
            .file_name()
            .map(|n| n.to_string_lossy())
            .as_deref()
            .and_then(|n| n.strip_prefix(TEMP_PREFIX))
            .unwrap_or_default()
            .to_string()
    }
}

struct Entry {
    relative: String,
    full: PathBuf,
}

/// Package `local_path` minus `exclusions`.
///
/// Relative paths and permission bits are preserved. Symlinks are never
/// followed: one that resolves inside `local_path` is stored as a link,
/// anything else is skipped.
///
/// # Errors
/// [`DeployError::SourceNotFound`] if `local_path` is not a directory,
/// [`DeployError::ArchiveIo`] if reading the tree or writing the archive fails.
pub fn build(local_path: &Path, exclusions: &ExclusionSet) -> DeployResult<Archive> {
    if !local_path.is_dir() {
        return Err(DeployError::SourceNotFound(local_path.to_path_buf()));
    }
    let root = local_path
        .canonicalize()
        .map_err(|e| DeployError::archive_io(local_path, e))?;

    let mut entries = Vec::new();
    walk(&root, &root, exclusions, &mut entries)?;

    let dir = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempdir()
        .map_err(|e| DeployError::archive_io(std::env::temp_dir(), e))?;
    let name = root
        .file_name()
        .map_or_else(|| "app".to_string(), |n| n.to_string_lossy().into_owned());
    let path = dir.path().join(format!("deploy_{name}.tar.gz"));

    write_tar_gz(&path, &entries)?;

    let size_bytes = fs::metadata(&path)
        .map_err(|e| DeployError::archive_io(&path, e))?
        .len();

    tracing::debug!(
        "Packaged {} entries from {} ({} bytes)",
        entries.len(),
        root.display(),
        size_bytes
    );

    Ok(Archive {
        dir,
        path,
        entries: entries.into_iter().map(|e| e.relative).collect(),
        size_bytes,
    })
}

/// Depth-first walk in name order, pruning excluded directories.
fn walk(
    root: &Path,
    current: &Path,
    exclusions: &ExclusionSet,
    out: &mut Vec<Entry>,
) -> DeployResult<()> {
    let mut children = fs::read_dir(current)
        .and_then(|rd| rd.collect::<Result<Vec<_>, _>>())
        .map_err(|e| DeployError::archive_io(current, e))?;
    children.sort_by_key(fs::DirEntry::file_name);

    for child in children {
        let full = child.path();
        let Some(relative) = to_slash_relative(root, &full) else {
            continue;
        };
        let file_type = child
            .file_type()
            .map_err(|e| DeployError::archive_io(&full, e))?;

        if file_type.is_symlink() {
            if exclusions.is_excluded(&relative, false) {
                continue;
            }
            match fs::canonicalize(&full) {
                Ok(target) if target.starts_with(root) => out.push(Entry { relative, full }),
                _ => tracing::warn!("Skipping symlink {} (points outside source tree)", relative),
            }
        } else if file_type.is_dir() {
            if exclusions.is_excluded(&relative, true) {
                continue;
            }
            out.push(Entry {
                relative,
                full: full.clone(),
            });
            walk(root, &full, exclusions, out)?;
        } else if !exclusions.is_excluded(&relative, false) {
            out.push(Entry { relative, full });
        }
    }
    Ok(())
}

fn write_tar_gz(path: &Path, entries: &[Entry]) -> DeployResult<()> {
    let file = File::create(path).map_err(|e| DeployError::archive_io(path, e))?;
    let enc = GzEncoder::new(file, Compression::default());
    let mut tar = tar::Builder::new(enc);
    tar.follow_symlinks(false);

    for entry in entries {
        tar.append_path_with_name(&entry.full, &entry.relative)
            .map_err(|e| DeployError::archive_io(&entry.full, e))?;
    }

    let enc = tar
        .into_inner()
        .map_err(|e| DeployError::archive_io(path, e))?;
    enc.finish().map_err(|e| DeployError::archive_io(path, e))?;
    Ok(())
}

/// Run local pre-packaging commands in order, stopping at the first failure.
///
/// # Errors
/// [`DeployError::PreSync`] with the failing command's exit code and output.
pub async fn run_local_steps(steps: &[LocalStep], timeout: Duration) -> DeployResult<()> {
    for step in steps {
        tracing::info!("{} (in {})", step.description, step.cwd.display());

        let mut cmd = shell_command(&step.command);
        cmd.current_dir(&step.cwd).kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(DeployError::PreSync {
                    command: step.command.clone(),
                    exit_code: -1,
                    output: e.to_string(),
                })
            }
            Err(_) => {
                return Err(DeployError::PreSync {
                    command: step.command.clone(),
                    exit_code: -1,
                    output: format!("timed out after {}s", timeout.as_secs()),
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let text = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(DeployError::PreSync {
                command: step.command.clone(),
                exit_code: output.status.code().unwrap_or(-1),
                output: text.trim().to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(unix)]
fn shell_command(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}
