//! systemd as the remote service supervisor.
//!
//! Command builders and output parsers are pure; the async helpers run them
//! through a [`RemoteTransport`].

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::transport::RemoteTransport;
use crate::utils::path::shell_escape;

/// Run state reported by `systemctl is-active`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Active,
    Inactive,
    Failed,
    Unknown(String),
}

impl ServiceState {
    /// Parse `systemctl is-active` output. Transitional states such as
    /// `activating` count as unknown.
    #[must_use]
    pub fn parse(output: &str) -> Self {
        match output.trim() {
            "active" => Self::Active,
            "inactive" => Self::Inactive,
            "failed" => Self::Failed,
            other => Self::Unknown(other.to_string()),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Inactive => f.write_str("inactive"),
            Self::Failed => f.write_str("failed"),
            Self::Unknown(s) if s.is_empty() => f.write_str("unknown"),
            Self::Unknown(s) => write!(f, "unknown ({s})"),
        }
    }
}

/// Options for a journal query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    pub lines: usize,
    pub since: Option<String>,
    pub follow: bool,
}

#[must_use]
pub fn status_command(service: &str) -> String {
    format!("systemctl is-active {}", shell_escape(service))
}

#[must_use]
pub fn restart_command(service: &str) -> String {
    format!("sudo systemctl restart {}", shell_escape(service))
}

#[must_use]
pub fn main_pid_command(service: &str) -> String {
    format!("systemctl show -p MainPID --value {}", shell_escape(service))
}

#[must_use]
pub fn logs_command(service: &str, query: &LogQuery) -> String {
    let mut cmd = format!("sudo journalctl -u {} -n {}", shell_escape(service), query.lines);
    if let Some(since) = &query.since {
        cmd.push_str(" --since ");
        cmd.push_str(&shell_escape(since));
    }
    if query.follow {
        cmd.push_str(" -f");
    } else {
        cmd.push_str(" --no-pager");
    }
    cmd
}

/// Parse `systemctl show -p MainPID --value`; `0` means no main process.
#[must_use]
pub fn parse_main_pid(output: &str) -> Option<u32> {
    let value = output.trim();
    let value = value.strip_prefix("MainPID=").unwrap_or(value);
    value.parse().ok().filter(|pid| *pid != 0)
}

/// Query the service's run state.
///
/// # Errors
/// Returns an error only if the command could not be run.
pub async fn status(
    transport: &dyn RemoteTransport,
    service: &str,
    timeout: Duration,
) -> Result<ServiceState> {
    // is-active exits nonzero for anything but "active"; the state is on stdout.
    let result = transport.execute(&status_command(service), timeout).await?;
    Ok(ServiceState::parse(&result.stdout))
}

/// Restart the service, returning the command's exit code.
///
/// # Errors
/// Returns an error only if the command could not be run.
pub async fn restart(
    transport: &dyn RemoteTransport,
    service: &str,
    timeout: Duration,
) -> Result<i32> {
    let result = transport.execute(&restart_command(service), timeout).await?;
    Ok(result.exit_code)
}

/// The service's main pid, if it has one.
///
/// # Errors
/// Returns an error only if the command could not be run.
pub async fn main_pid(
    transport: &dyn RemoteTransport,
    service: &str,
    timeout: Duration,
) -> Result<Option<u32>> {
    let result = transport.execute(&main_pid_command(service), timeout).await?;
    Ok(parse_main_pid(&result.stdout))
}

/// Outcome of a journal fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFetch {
    pub exit_code: i32,
    pub lines: Vec<String>,
}

/// Fetch the last `lines` journal lines for the service.
///
/// # Errors
/// Returns an error only if the command could not be run.
pub async fn recent_logs(
    transport: &dyn RemoteTransport,
    service: &str,
    lines: usize,
    timeout: Duration,
) -> Result<LogFetch> {
    let query = LogQuery {
        lines,
        ..LogQuery::default()
    };
    let result = transport.execute(&logs_command(service, &query), timeout).await?;
    Ok(LogFetch {
        exit_code: result.exit_code,
        lines: result
            .stdout
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_service_states() {
        assert_eq!(ServiceState::parse("active\n"), ServiceState::Active);
        assert_eq!(ServiceState::parse("inactive"), ServiceState::Inactive);
        assert_eq!(ServiceState::parse("failed\n"), ServiceState::Failed);
        assert_eq!(
            ServiceState::parse("activating"),
            ServiceState::Unknown("activating".into())
        );
        assert_eq!(ServiceState::parse("").to_string(), "unknown");
    }

    #[test]
    fn parse_main_pid_values() {
        assert_eq!(parse_main_pid("4242\n"), Some(4242));
        assert_eq!(parse_main_pid("MainPID=311"), Some(311));
        assert_eq!(parse_main_pid("0"), None);
        assert_eq!(parse_main_pid(""), None);
    }

    #[test]
    fn logs_command_variants() {
        let tail = LogQuery {
            lines: 50,
            ..LogQuery::default()
        };
        assert_eq!(
            logs_command("rjbingo", &tail),
            "sudo journalctl -u 'rjbingo' -n 50 --no-pager"
        );

        let follow = LogQuery {
            lines: 20,
            since: Some("1 hour ago".into()),
            follow: true,
        };
        assert_eq!(
            logs_command("rjbingo", &follow),
            "sudo journalctl -u 'rjbingo' -n 20 --since '1 hour ago' -f"
        );
    }

    #[test]
    fn restart_command_quotes_service() {
        assert_eq!(
            restart_command("taskschedule"),
            "sudo systemctl restart 'taskschedule'"
        );
    }
}
