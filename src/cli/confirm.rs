use std::io::{IsTerminal, Write};

use anyhow::Result;
use colored::Colorize;

use crate::orchestrator::Mode;
use crate::target::TargetDescriptor;

/// Ask on the terminal before a mutating run. Without a terminal the answer
/// is no, so unattended runs need `--yes`.
pub fn ask(mode: Mode, targets: &[&TargetDescriptor], host: &str) -> Result<bool> {
    let verb = match mode {
        Mode::Deploy => "Deploy",
        Mode::Restart => "Restart",
        Mode::Status => return Ok(true),
    };
    let ids: Vec<&str> = targets.iter().map(|t| t.id.as_str()).collect();

    println!("{} {} on {}", verb.bold(), ids.join(", ").cyan(), host.cyan());
    if !std::io::stdin().is_terminal() {
        println!("{}", "Not a terminal; pass --yes to proceed.".dimmed());
        return Ok(false);
    }

    print!("Proceed? [y/N]: ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
