use std::io::Write;

use anyhow::{bail, Result};
use tokio::sync::watch;

use super::Context;
use crate::registry::ALL;
use crate::supervisor::{logs_command, LogQuery};
use crate::transport::{RemoteTransport, SshTransport};

/// Timeout for a one-shot journal fetch.
const FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

pub async fn run(
    ctx: &Context,
    target: &str,
    lines: usize,
    follow: bool,
    since: Option<String>,
    mut interrupt: watch::Receiver<bool>,
) -> Result<bool> {
    if target.trim().eq_ignore_ascii_case(ALL) {
        bail!("logs takes a single target, not '{ALL}'");
    }
    let Some(target) = ctx.registry.resolve(target)?.into_iter().next() else {
        bail!("no target selected");
    };

    let query = LogQuery {
        lines,
        since,
        follow,
    };
    let command = logs_command(&target.service_name, &query);
    let transport = SshTransport::new(ctx.config.connection_params());

    if !follow {
        let result = transport.execute(&command, FETCH_TIMEOUT).await?;
        print!("{}", result.stdout);
        if !result.success() {
            eprint!("{}", result.stderr);
        }
        return Ok(result.success());
    }

    let conn = transport.session().await?;
    let mut stdout = std::io::stdout();
    tokio::select! {
        exit = conn.exec_streaming(&command, |chunk| {
            let _ = stdout.write_all(chunk);
            let _ = stdout.flush();
        }) => Ok(exit? == 0),
        _ = interrupt.wait_for(|stop| *stop) => Ok(true),
    }
}
