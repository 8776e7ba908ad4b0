//! Listening-socket and process inspection on the remote host.

use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::transport::RemoteTransport;

/// Socket table query. Tries `ss` with process info (needs root), then plain
/// `ss`, then `netstat`; the parser accepts both formats.
pub const LISTENING_PORTS_COMMAND: &str = "sudo -n ss -Hltnp 2>/dev/null \
    || ss -Hltnp 2>/dev/null \
    || sudo -n netstat -tlnp 2>/dev/null";

/// A bound TCP listening socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListeningSocket {
    pub port: u16,
    pub pid: Option<u32>,
    pub process: Option<String>,
}

/// Parse `ss -Hltnp` or `netstat -tlnp` output into listening sockets.
/// Lines without a recognisable local address are skipped.
#[must_use]
pub fn parse_listening_sockets(output: &str) -> Vec<ListeningSocket> {
    output.lines().filter_map(parse_socket_line).collect()
}

fn parse_socket_line(line: &str) -> Option<ListeningSocket> {
    let mut tokens = line.split_whitespace();
    // The local address is the first `addr:port` token; the peer is `*:*`.
    let port = tokens.by_ref().find_map(local_port)?;

    let rest: Vec<&str> = tokens.collect();
    let (pid, process) = rest
        .iter()
        .find_map(|t| parse_ss_users(t).or_else(|| parse_netstat_program(t)))
        .map_or((None, None), |(pid, name)| (Some(pid), name));

    Some(ListeningSocket { port, pid, process })
}

fn local_port(token: &str) -> Option<u16> {
    let (addr, port) = token.rsplit_once(':')?;
    if addr.is_empty() {
        return None;
    }
    port.parse().ok()
}

/// `users:(("python3",pid=1234,fd=3))`
fn parse_ss_users(token: &str) -> Option<(u32, Option<String>)> {
    let start = token.find("pid=")? + 4;
    let digits: String = token[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    let pid = digits.parse().ok()?;

    let name = token
        .split_once("((\"")
        .and_then(|(_, rest)| rest.split_once('"'))
        .map(|(name, _)| name.to_string());

    Some((pid, name))
}

/// `1234/python3`
fn parse_netstat_program(token: &str) -> Option<(u32, Option<String>)> {
    let (pid, name) = token.split_once('/')?;
    let pid = pid.parse().ok()?;
    let name = (!name.is_empty()).then(|| name.to_string());
    Some((pid, name))
}

#[must_use]
pub fn process_info_command(pid: u32) -> String {
    format!("ps -p {pid} -o comm=")
}

/// All listening TCP sockets on the host.
///
/// # Errors
/// Returns an error if the command could not be run, or if every fallback
/// failed without output (no `ss`, `netstat` needing a password).
pub async fn listening_ports(
    transport: &dyn RemoteTransport,
    timeout: Duration,
) -> Result<Vec<ListeningSocket>> {
    let result = transport.execute(LISTENING_PORTS_COMMAND, timeout).await?;
    if result.exit_code != 0 && result.stdout.trim().is_empty() {
        return Err(anyhow!(
            "ss/netstat unavailable (exit {}){}",
            result.exit_code,
            match result.stderr.trim() {
                "" => String::new(),
                err => format!(": {err}"),
            }
        ));
    }
    Ok(parse_listening_sockets(&result.stdout))
}

/// Executable name of `pid`, or `None` if no such process.
///
/// # Errors
/// Returns an error only if the command could not be run.
pub async fn process_info(
    transport: &dyn RemoteTransport,
    pid: u32,
    timeout: Duration,
) -> Result<Option<String>> {
    let result = transport.execute(&process_info_command(pid), timeout).await?;
    let name = result.stdout.trim();
    if result.exit_code != 0 || name.is_empty() {
        return Ok(None);
    }
    Ok(Some(name.to_string()))
}
