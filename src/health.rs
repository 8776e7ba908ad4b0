//! Health verification of a deployed target.
//!
//! Five probes run in a fixed order, cheapest first. A failing probe never
//! stops the ones after it: seeing every signal together is what makes a
//! broken deployment diagnosable.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::error::{DeployError, DeployResult};
use crate::inspect::{self, ListeningSocket};
use crate::supervisor;
use crate::target::TargetDescriptor;
use crate::transport::RemoteTransport;

/// Timeout for the HTTP probe.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for each remote inspection command.
const PROBE_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeName {
    ServiceActive,
    PortListening,
    ProcessRunning,
    HttpResponse,
    RecentLogs,
}

impl ProbeName {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServiceActive => "service-active",
            Self::PortListening => "port-listening",
            Self::ProcessRunning => "process-running",
            Self::HttpResponse => "http-response",
            Self::RecentLogs => "recent-logs",
        }
    }
}

impl fmt::Display for ProbeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Passed,
    Failed,
    Skipped,
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        })
    }
}

/// Result of one probe, with the evidence behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeOutcome {
    pub name: ProbeName,
    pub status: ProbeStatus,
    pub detail: String,
}

impl ProbeOutcome {
    pub fn passed(name: ProbeName, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: ProbeStatus::Passed,
            detail: detail.into(),
        }
    }

    pub fn failed(name: ProbeName, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: ProbeStatus::Failed,
            detail: detail.into(),
        }
    }

    pub fn skipped(name: ProbeName, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: ProbeStatus::Skipped,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn is_passed(&self) -> bool {
        self.status == ProbeStatus::Passed
    }
}

/// All probe outcomes for a target plus the overall verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub probes: Vec<ProbeOutcome>,
    pub success: bool,
}

impl HealthReport {
    #[must_use]
    pub fn new(probes: Vec<ProbeOutcome>) -> Self {
        let success = overall_success(&probes);
        Self { probes, success }
    }

    #[must_use]
    pub fn probe(&self, name: ProbeName) -> Option<&ProbeOutcome> {
        self.probes.iter().find(|p| p.name == name)
    }
}

/// `service ∧ port ∧ process ∧ (http ∨ not configured)`.
///
/// `recent-logs` never affects the verdict.
#[must_use]
pub fn overall_success(probes: &[ProbeOutcome]) -> bool {
    let status = |name: ProbeName| probes.iter().find(|p| p.name == name).map(|p| p.status);
    let required = [
        ProbeName::ServiceActive,
        ProbeName::PortListening,
        ProbeName::ProcessRunning,
    ];

    required
        .into_iter()
        .all(|name| status(name) == Some(ProbeStatus::Passed))
        && matches!(
            status(ProbeName::HttpResponse),
            None | Some(ProbeStatus::Passed | ProbeStatus::Skipped)
        )
}

/// Runs the probe battery against deployed targets.
pub struct HealthVerifier {
    http: reqwest::Client,
    log_lines: usize,
}

impl HealthVerifier {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(log_lines: usize) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, log_lines })
    }

    /// Run every probe for `target`.
    ///
    /// # Errors
    /// [`DeployError::ProbeTransport`] only when the host cannot be reached at
    /// all. Individual probe failures are part of the report.
    pub async fn verify(
        &self,
        transport: &dyn RemoteTransport,
        target: &TargetDescriptor,
    ) -> DeployResult<HealthReport> {
        transport
            .check_connection()
            .await
            .map_err(|e| DeployError::ProbeTransport(format!("{e:#}")))?;

        let service = probe_service(transport, target).await;

        // One socket table read serves both the port and process probes.
        let sockets = inspect::listening_ports(transport, PROBE_COMMAND_TIMEOUT).await;
        let socket = match &sockets {
            Ok(list) => list.iter().find(|s| s.port == target.port).cloned(),
            Err(_) => None,
        };
        let port = match &sockets {
            Ok(_) => probe_port(target.port, socket.as_ref()),
            Err(e) => ProbeOutcome::failed(
                ProbeName::PortListening,
                format!("could not read socket table: {e:#}"),
            ),
        };

        let process = probe_process(transport, target, socket.as_ref()).await;
        let http = self.probe_http(target).await;
        let logs = self.probe_logs(transport, target).await;

        let report = HealthReport::new(vec![service, port, process, http, logs]);
        tracing::info!(
            "{}: health {}",
            target.id,
            if report.success { "ok" } else { "failed" }
        );
        Ok(report)
    }

    async fn probe_http(&self, target: &TargetDescriptor) -> ProbeOutcome {
        let Some(url) = &target.health_url else {
            return ProbeOutcome::skipped(ProbeName::HttpResponse, "no health URL configured");
        };

        match self.http.get(url).send().await {
            Ok(resp) if resp.status().is_success() => {
                ProbeOutcome::passed(ProbeName::HttpResponse, format!("{} from {url}", resp.status()))
            }
            Ok(resp) => {
                ProbeOutcome::failed(ProbeName::HttpResponse, format!("{} from {url}", resp.status()))
            }
            Err(e) => ProbeOutcome::failed(ProbeName::HttpResponse, describe_http_error(&e, url)),
        }
    }

    async fn probe_logs(
        &self,
        transport: &dyn RemoteTransport,
        target: &TargetDescriptor,
    ) -> ProbeOutcome {
        match supervisor::recent_logs(
            transport,
            &target.service_name,
            self.log_lines,
            PROBE_COMMAND_TIMEOUT,
        )
        .await
        {
            Ok(fetch) if fetch.exit_code == 0 && !fetch.lines.is_empty() => {
                ProbeOutcome::passed(ProbeName::RecentLogs, fetch.lines.join("\n"))
            }
            Ok(fetch) if fetch.exit_code == 0 => {
                ProbeOutcome::failed(ProbeName::RecentLogs, "no log output")
            }
            Ok(fetch) => ProbeOutcome::failed(
                ProbeName::RecentLogs,
                format!("journalctl exited with {}", fetch.exit_code),
            ),
            Err(e) => ProbeOutcome::failed(ProbeName::RecentLogs, format!("{e:#}")),
        }
    }
}

async fn probe_service(transport: &dyn RemoteTransport, target: &TargetDescriptor) -> ProbeOutcome {
    match supervisor::status(transport, &target.service_name, PROBE_COMMAND_TIMEOUT).await {
        Ok(state) if state.is_active() => {
            ProbeOutcome::passed(ProbeName::ServiceActive, format!("{}: {state}", target.service_name))
        }
        Ok(state) => {
            ProbeOutcome::failed(ProbeName::ServiceActive, format!("{}: {state}", target.service_name))
        }
        Err(e) => ProbeOutcome::failed(ProbeName::ServiceActive, format!("{e:#}")),
    }
}

fn probe_port(port: u16, socket: Option<&ListeningSocket>) -> ProbeOutcome {
    match socket {
        Some(ListeningSocket {
            pid: Some(pid),
            process: Some(name),
            ..
        }) => ProbeOutcome::passed(
            ProbeName::PortListening,
            format!("port {port} bound by {name} (pid {pid})"),
        ),
        Some(_) => ProbeOutcome::passed(ProbeName::PortListening, format!("port {port} listening")),
        None => ProbeOutcome::failed(
            ProbeName::PortListening,
            format!("nothing listening on port {port}"),
        ),
    }
}

async fn probe_process(
    transport: &dyn RemoteTransport,
    target: &TargetDescriptor,
    socket: Option<&ListeningSocket>,
) -> ProbeOutcome {
    // Prefer the socket owner; fall back to the unit's main pid.
    let pid = match socket.and_then(|s| s.pid) {
        Some(pid) => Some(pid),
        None => match supervisor::main_pid(transport, &target.service_name, PROBE_COMMAND_TIMEOUT)
            .await
        {
            Ok(pid) => pid,
            Err(e) => return ProbeOutcome::failed(ProbeName::ProcessRunning, format!("{e:#}")),
        },
    };

    let Some(pid) = pid else {
        return ProbeOutcome::failed(
            ProbeName::ProcessRunning,
            format!(
                "no process for port {} or service {}",
                target.port, target.service_name
            ),
        );
    };

    match inspect::process_info(transport, pid, PROBE_COMMAND_TIMEOUT).await {
        Ok(Some(exe)) if target.runtime.matches_executable(&exe) => {
            ProbeOutcome::passed(ProbeName::ProcessRunning, format!("pid {pid} ({exe})"))
        }
        Ok(Some(exe)) => ProbeOutcome::failed(
            ProbeName::ProcessRunning,
            format!(
                "pid {pid} is '{exe}', expected one of: {}",
                target.runtime.expected_executables().join(", ")
            ),
        ),
        Ok(None) => ProbeOutcome::failed(ProbeName::ProcessRunning, format!("pid {pid} is not running")),
        Err(e) => ProbeOutcome::failed(ProbeName::ProcessRunning, format!("{e:#}")),
    }
}

fn describe_http_error(e: &reqwest::Error, url: &str) -> String {
    if e.is_timeout() {
        format!("timed out after {}s ({url})", HTTP_TIMEOUT.as_secs())
    } else if e.is_connect() {
        format!("connection failed ({url}): {e}")
    } else {
        format!("request failed ({url}): {e}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all(status: ProbeStatus) -> Vec<ProbeOutcome> {
        [
            ProbeName::ServiceActive,
            ProbeName::PortListening,
            ProbeName::ProcessRunning,
            ProbeName::HttpResponse,
            ProbeName::RecentLogs,
        ]
        .into_iter()
        .map(|name| ProbeOutcome {
            name,
            status,
            detail: String::new(),
        })
        .collect()
    }

    fn with(mut probes: Vec<ProbeOutcome>, name: ProbeName, status: ProbeStatus) -> Vec<ProbeOutcome> {
        for p in &mut probes {
            if p.name == name {
                p.status = status;
            }
        }
        probes
    }

    #[test]
    fn all_passing_is_success() {
        assert!(overall_success(&all(ProbeStatus::Passed)));
    }

    #[test]
    fn each_required_probe_is_decisive() {
        for name in [
            ProbeName::ServiceActive,
            ProbeName::PortListening,
            ProbeName::ProcessRunning,
            ProbeName::HttpResponse,
        ] {
            let probes = with(all(ProbeStatus::Passed), name, ProbeStatus::Failed);
            assert!(!overall_success(&probes), "{name} failing should fail the target");
        }
    }

    #[test]
    fn skipped_http_does_not_count() {
        let probes = with(all(ProbeStatus::Passed), ProbeName::HttpResponse, ProbeStatus::Skipped);
        assert!(overall_success(&probes));
    }

    #[test]
    fn recent_logs_is_informational() {
        let probes = with(all(ProbeStatus::Passed), ProbeName::RecentLogs, ProbeStatus::Failed);
        assert!(overall_success(&probes));
    }

    #[test]
    fn missing_required_probe_fails() {
        let probes: Vec<_> = all(ProbeStatus::Passed)
            .into_iter()
            .filter(|p| p.name != ProbeName::ProcessRunning)
            .collect();
        assert!(!overall_success(&probes));
    }

    #[test]
    fn port_probe_details() {
        let socket = ListeningSocket {
            port: 5000,
            pid: Some(12),
            process: Some("python3".into()),
        };
        let outcome = probe_port(5000, Some(&socket));
        assert!(outcome.is_passed());
        assert_eq!(outcome.detail, "port 5000 bound by python3 (pid 12)");
        assert_eq!(probe_port(5000, None).status, ProbeStatus::Failed);
    }
}
