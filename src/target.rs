use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::exclude::ExclusionSet;

/// Application runtime, used to pick a default dependency install command
/// and to recognise the serving process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Python,
    Node,
    #[default]
    Other,
}

impl Runtime {
    /// Dependency install command run from the remote application root.
    #[must_use]
    pub fn default_install(self) -> Option<&'static str> {
        match self {
            Self::Python => Some("python3 -m pip install -r requirements.txt"),
            Self::Node => Some("npm install"),
            Self::Other => None,
        }
    }

    /// Executable name prefixes expected for the serving process.
    /// Empty means "any process is acceptable".
    #[must_use]
    pub fn expected_executables(self) -> &'static [&'static str] {
        match self {
            Self::Python => &["python", "gunicorn", "uvicorn", "flask", "waitress"],
            Self::Node => &["node", "npm"],
            Self::Other => &[],
        }
    }

    /// Whether `executable` looks like this runtime's serving process.
    #[must_use]
    pub fn matches_executable(self, executable: &str) -> bool {
        let expected = self.expected_executables();
        expected.is_empty() || expected.iter().any(|e| executable.starts_with(e))
    }
}

/// What a remote step does; restart-only runs execute just the `Restart` steps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Install,
    #[default]
    Build,
    Restart,
}

/// One logical remote operation run after file sync.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RemoteStep {
    pub name: String,
    pub command: String,
    pub kind: StepKind,
}

impl RemoteStep {
    pub fn new(name: impl Into<String>, command: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            kind,
        }
    }
}

/// A local command run inside the source tree before packaging
/// (frontend builds and the like).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LocalStep {
    pub command: String,
    pub cwd: PathBuf,
    pub description: String,
}

/// Everything needed to deploy and verify one application.
#[derive(Debug, Clone, Serialize)]
pub struct TargetDescriptor {
    pub id: String,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub exclusions: ExclusionSet,
    pub service_name: String,
    pub port: u16,
    pub health_url: Option<String>,
    pub runtime: Runtime,
    pub pre_sync: Vec<LocalStep>,
    pub ensure_dirs: Vec<String>,
    pub restart_commands: Vec<RemoteStep>,
}

impl TargetDescriptor {
    /// Steps executed by a restart-only run.
    pub fn restart_steps(&self) -> impl Iterator<Item = &RemoteStep> {
        self.restart_commands
            .iter()
            .filter(|s| s.kind == StepKind::Restart)
    }
}
