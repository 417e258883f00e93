//! Status command - shows whether the tool server is reachable.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde::Serialize;

use super::Context;

/// Arguments for the status command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Also show where the credential came from
    #[arg(short, long)]
    pub detailed: bool,
}

/// Status response for JSON output.
#[derive(Debug, Serialize)]
struct StatusOutput {
    connected: bool,
    state: String,
    transport: String,
    endpoint: String,
    session_id: Option<String>,
    error: Option<String>,
}

/// Run the status command.
pub async fn run(args: StatusArgs, ctx: &Context) -> Result<()> {
    let profile = ctx.profile()?;
    let manager = toolwire_link::ConnectionManager::new();
    let outcome = manager.connect(profile.options.clone()).await;

    let output = StatusOutput {
        connected: manager.is_connected(),
        state: manager.state().to_string(),
        transport: profile.options.kind.to_string(),
        endpoint: profile.options.endpoint.clone(),
        session_id: manager.session_id(),
        error: outcome.err().map(|e| e.to_string()),
    };
    manager.disconnect().await;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!();
    println!("{}", style("Tool Server Status").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!();

    if output.connected {
        let green = Style::new().green();
        println!("  {} {}", dim.apply_to("Status:"), green.apply_to("● connected"));
    } else {
        let red = Style::new().red();
        println!(
            "  {} {}",
            dim.apply_to("Status:"),
            red.apply_to(format!("● {}", output.state))
        );
    }
    println!("  {} {}", dim.apply_to("Transport:"), output.transport);
    println!("  {} {}", dim.apply_to("Endpoint:"), output.endpoint);
    if let Some(session_id) = &output.session_id {
        println!("  {} {}", dim.apply_to("Session:"), session_id);
    }

    if args.detailed {
        let source = profile
            .credential_source
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".to_string());
        println!("  {} {}", dim.apply_to("Credential:"), source);
    }

    if let Some(error) = &output.error
        && (ctx.verbose || args.detailed)
    {
        println!();
        println!("  {} {}", dim.apply_to("Error:"), error);
    }

    println!();
    Ok(())
}
