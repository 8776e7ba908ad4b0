use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionParams;
use crate::error::{DeployError, DeployResult};
use crate::exclude::ExclusionSet;
use crate::orchestrator::PipelineSettings;
use crate::registry::TargetRegistry;
use crate::supervisor;
use crate::target::{LocalStep, RemoteStep, Runtime, StepKind, TargetDescriptor};
use crate::utils::path::{expand_tilde, resolve_local, shell_escape_remote_path};

/// File name looked up in the working directory before the user config dir.
pub const LOCAL_CONFIG_FILE: &str = "deploy-hub.toml";

/// Deployment configuration, loaded once at startup and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Maximum number of targets processed at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Pause between restarting a service and probing it.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
    /// Timeout for each install/build/restart command.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Journal lines shown by the recent-logs probe.
    #[serde(default = "default_log_lines")]
    pub log_lines: usize,
    pub host: HostEntry,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub targets: Vec<TargetEntry>,
    /// Directory relative `local_path`s are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEntry {
    pub address: String,
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub identity: Option<String>,
    #[serde(default)]
    pub auth: AuthMethod,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    Auto,
    Agent,
    Key,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    /// Exclusion rules applied to every target.
    #[serde(default = "default_exclude")]
    pub exclude: ExclusionSet,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            exclude: default_exclude(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetEntry {
    pub id: String,
    pub local_path: String,
    pub remote_path: String,
    /// systemd unit; defaults to the target id.
    pub service: Option<String>,
    pub port: u16,
    pub health_url: Option<String>,
    #[serde(default)]
    pub runtime: Runtime,
    #[serde(default)]
    pub exclude: ExclusionSet,
    #[serde(default)]
    pub ensure_dirs: Vec<String>,
    /// Dependency install command; defaults per runtime, `""` disables it.
    pub install: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepEntry>,
    #[serde(default)]
    pub pre_sync: Vec<PreSyncEntry>,
}

/// Extra remote step run from the application root, after install.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEntry {
    pub name: String,
    pub run: String,
    #[serde(default)]
    pub kind: StepKind,
}

/// Local command run before packaging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreSyncEntry {
    pub run: String,
    /// Subdirectory of `local_path` to run in.
    pub cwd: Option<String>,
    pub description: Option<String>,
}

fn default_concurrency() -> usize {
    2
}

fn default_settle_secs() -> u64 {
    2
}

fn default_command_timeout_secs() -> u64 {
    120
}

fn default_log_lines() -> usize {
    3
}

fn default_ssh_port() -> u16 {
    22
}

fn default_exclude() -> ExclusionSet {
    ExclusionSet::from_patterns([".git/", ".DS_Store"])
}

impl DeployConfig {
    /// Load from `explicit`, or from the first default location that exists.
    ///
    /// # Errors
    /// Returns an error if no config file is found or it cannot be parsed.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let base_dir = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let config = Self::from_toml(&content, &base_dir)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        tracing::debug!(
            "Loaded {} target(s) from {}",
            config.targets.len(),
            path.display()
        );
        Ok(config)
    }

    /// Parse TOML, resolving relative local paths against `base_dir`.
    ///
    /// # Errors
    /// Returns an error if the TOML is malformed or misses required fields.
    pub fn from_toml(content: &str, base_dir: &Path) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.base_dir = base_dir.to_path_buf();
        Ok(config)
    }

    /// `./deploy-hub.toml`, else `<config dir>/deploy-hub/deploy.toml`.
    ///
    /// # Errors
    /// Returns an error if neither file exists.
    pub fn default_path() -> Result<PathBuf> {
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Ok(local);
        }
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
        let user = config_dir.join("deploy-hub").join("deploy.toml");
        if user.exists() {
            return Ok(user);
        }
        Err(anyhow!(
            "No config found. Create {} or {}, or pass --config",
            LOCAL_CONFIG_FILE,
            user.display()
        ))
    }

    #[must_use]
    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            host: self.host.address.clone(),
            user: self.host.user.clone(),
            port: self.host.port,
            identity: self.host.identity.as_deref().map(expand_tilde),
            auth_method: self.host.auth,
        }
    }

    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    #[must_use]
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            concurrency: self.concurrency.max(1),
            settle_delay: self.settle_delay(),
            command_timeout: self.command_timeout(),
        }
    }

    /// Build the target registry from the `[[targets]]` tables.
    ///
    /// # Errors
    /// Returns [`DeployError::Config`] on duplicate ids or ports.
    pub fn registry(&self) -> DeployResult<TargetRegistry> {
        let targets = self
            .targets
            .iter()
            .map(|entry| self.descriptor(entry))
            .collect::<DeployResult<Vec<_>>>()?;
        TargetRegistry::new(targets)
    }

    fn descriptor(&self, entry: &TargetEntry) -> DeployResult<TargetDescriptor> {
        let id = entry.id.trim().to_lowercase();
        if entry.remote_path.trim().is_empty() {
            return Err(DeployError::Config(format!("target '{id}' has no remote_path")));
        }

        let local_path = resolve_local(&self.base_dir, &entry.local_path);
        let service_name = entry.service.clone().unwrap_or_else(|| id.clone());

        let mut exclusions = self.defaults.exclude.clone();
        exclusions.extend(&entry.exclude);

        let pre_sync = entry
            .pre_sync
            .iter()
            .map(|p| LocalStep {
                command: p.run.clone(),
                cwd: p
                    .cwd
                    .as_deref()
                    .map_or_else(|| local_path.clone(), |c| local_path.join(c)),
                description: p.description.clone().unwrap_or_else(|| p.run.clone()),
            })
            .collect();

        Ok(TargetDescriptor {
            restart_commands: remote_steps(entry, &service_name),
            id,
            local_path,
            remote_path: entry.remote_path.clone(),
            exclusions,
            service_name,
            port: entry.port,
            health_url: entry.health_url.clone().filter(|u| !u.trim().is_empty()),
            runtime: entry.runtime,
            pre_sync,
            ensure_dirs: entry.ensure_dirs.clone(),
        })
    }
}

/// Install, then configured steps, then the service restart.
fn remote_steps(entry: &TargetEntry, service_name: &str) -> Vec<RemoteStep> {
    let root = shell_escape_remote_path(&entry.remote_path);
    let mut steps = Vec::new();

    let install = entry
        .install
        .as_deref()
        .or_else(|| entry.runtime.default_install())
        .filter(|cmd| !cmd.trim().is_empty());
    if let Some(cmd) = install {
        steps.push(RemoteStep::new(
            "install dependencies",
            format!("cd {root} && {cmd}"),
            StepKind::Install,
        ));
    }

    for step in &entry.steps {
        steps.push(RemoteStep::new(
            step.name.clone(),
            format!("cd {root} && {}", step.run),
            step.kind,
        ));
    }

    steps.push(RemoteStep::new(
        "restart service",
        supervisor::restart_command(service_name),
        StepKind::Restart,
    ));
    steps
}
