use anyhow::Result;
use colored::Colorize;

use super::Context;

pub fn run(ctx: &Context) -> Result<()> {
    let host = &ctx.config.host;

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&ctx.config.targets)?);
        return Ok(());
    }

    if ctx.registry.is_empty() {
        println!("{}", "No targets configured.".dimmed());
        return Ok(());
    }

    println!(
        "{} {}@{}:{}",
        "host".dimmed(),
        host.user.cyan(),
        host.address.cyan(),
        host.port.to_string().cyan(),
    );
    for target in ctx.registry.iter() {
        println!(
            "  {} {} {} {}",
            target.id.bold(),
            "->".dimmed(),
            target.remote_path.cyan(),
            format!(
                "(service: {}, port: {}, runtime: {:?})",
                target.service_name, target.port, target.runtime
            )
            .dimmed(),
        );
    }
    Ok(())
}
