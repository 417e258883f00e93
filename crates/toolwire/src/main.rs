//! toolwire - command-line client for tool-execution servers
//!
//! Main entry point for the toolwire CLI.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod profile;

use commands::{config, prompt, request, status};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// toolwire - talk to a tool-execution server over a socket or a spawned process
#[derive(Parser)]
#[command(name = "toolwire")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Server URL, or the command line to spawn for the process transport
    #[arg(long, global = true, env = "TOOLWIRE_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Transport: session, socket or process
    #[arg(long, global = true)]
    pub transport: Option<String>,

    /// Credential for the session bootstrap or the spawned server
    #[arg(long, global = true)]
    pub credential: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect, report connection status, and disconnect
    Status(status::StatusArgs),

    /// Send a prompt and print the answer
    Prompt(prompt::PromptArgs),

    /// Send a raw request and print its JSON result
    Request(request::RequestArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console (human-readable, stderr) plus a rotating JSON file
    let filter = if cli.verbose {
        "toolwire=debug,toolwire_link=debug,toolwire_config=debug,info"
    } else {
        "toolwire=info,toolwire_link=warn,toolwire_config=warn,warn"
    };

    let log_dir = toolwire_config::config_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| std::path::PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "toolwire.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "toolwire=trace,toolwire_link=trace,toolwire_config=trace,info",
                )),
        )
        .init();

    let ctx = commands::Context {
        overrides: profile::Overrides {
            endpoint: cli.endpoint,
            transport: cli.transport,
            credential: cli.credential,
        },
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Status(args) => status::run(args, &ctx).await,
        Commands::Prompt(args) => prompt::run(args, &ctx).await,
        Commands::Request(args) => request::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
