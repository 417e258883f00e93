//! Config command - configuration management.

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use console::Style;

use toolwire_config::{self, ToolwireConfig};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the merged configuration and the resolved connection
    Show,

    /// Show which config files are loaded and their precedence
    Which,

    /// Initialize a config file with defaults
    Init {
        /// Create project-local config (./toolwire.toml) instead of user config
        #[arg(long)]
        local: bool,
    },

    /// Show configuration file path
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(),
        ConfigCommand::Init { local } => cmd_init(local),
        ConfigCommand::Path => cmd_path(),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = toolwire_config::load_config(None)?;

    println!("# toolwire configuration\n");

    let sources = loaded.loaded_from();
    if sources.is_empty() {
        println!("No config files loaded (using defaults)\n");
    } else {
        println!("Config files:");
        for source in &sources {
            println!("  {}", source.display());
        }
        println!();
    }

    match crate::profile::resolve(&loaded.config, &ctx.overrides) {
        Ok(profile) => {
            let options = &profile.options;
            println!("Connection:");
            println!("  transport: {}", options.kind);
            println!("  endpoint:  {}", options.endpoint);
            match &profile.credential_source {
                Some(source) => println!("  credential: set ({})", source),
                None => println!("  credential: none"),
            }
            match options.request_timeout {
                Some(timeout) => println!("  request timeout: {}s", timeout.as_secs()),
                None => println!("  request timeout: none (wait indefinitely)"),
            }
            println!();
        }
        Err(e) => {
            println!("Connection: {}\n", e);
        }
    }

    if !loaded.warnings.is_empty() {
        let yellow = Style::new().yellow();
        println!("Warnings:");
        for w in &loaded.warnings {
            println!("  {} {}", yellow.apply_to("⚠"), w);
        }
        println!();
    }

    if ctx.verbose {
        println!("---\nRaw config:\n");
        println!("{}", loaded.config.to_toml()?);
    }

    Ok(())
}

fn cmd_which() -> Result<()> {
    let loaded = toolwire_config::load_config(None)?;

    println!("Config file search order (later overrides earlier):\n");
    for source in &loaded.sources {
        let status = if source.loaded { "✓" } else { "·" };
        println!("  {} {}", status, source.path.display());
    }
    println!();

    let loaded_count = loaded.loaded_from().len();
    if loaded_count == 0 {
        println!("No config files found. Run 'toolwire config init' to create one.");
    } else {
        println!("{} config file(s) loaded.", loaded_count);
    }

    Ok(())
}

fn cmd_init(local: bool) -> Result<()> {
    let path = if local {
        std::path::PathBuf::from("toolwire.toml")
    } else {
        toolwire_config::user_config_path().context("could not determine config directory")?
    };

    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }

    toolwire_config::save_config(&ToolwireConfig::template(), &path)?;

    println!("✓ Created config file: {}", path.display());
    println!();
    println!("Next steps:");
    println!(
        "  export {}=...          # credential, kept out of the file",
        toolwire_config::CREDENTIAL_ENV
    );
    println!("  toolwire config show               # verify configuration");
    println!("  toolwire status                    # try connecting");
    Ok(())
}

fn cmd_path() -> Result<()> {
    match toolwire_config::user_config_path() {
        Some(path) => println!("{}", path.display()),
        None => eprintln!("Could not determine config directory"),
    }
    Ok(())
}
