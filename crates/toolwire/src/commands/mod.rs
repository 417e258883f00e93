//! CLI command handlers.

pub mod config;
pub mod prompt;
pub mod request;
pub mod status;

use anyhow::{Context as _, Result};
use console::Style;
use toolwire_link::{ConnectionEvent, ConnectionManager};

use crate::profile::{self, Overrides, Profile};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Connection settings from the command line.
    pub overrides: Overrides,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Load layered config and resolve the connection profile.
    pub fn profile(&self) -> Result<Profile> {
        let loaded = toolwire_config::load_config(None)?;
        for warning in &loaded.warnings {
            tracing::warn!("{}", warning);
        }
        profile::resolve(&loaded.config, &self.overrides)
    }

    /// Connect using the resolved profile.
    ///
    /// In verbose mode, server diagnostics are echoed to stderr.
    pub async fn connect(&self) -> Result<(ConnectionManager, Profile)> {
        let profile = self.profile()?;
        let manager = ConnectionManager::new();

        if self.verbose {
            let mut events = manager.subscribe();
            tokio::spawn(async move {
                let dim = Style::new().dim();
                while let Ok(event) = events.recv().await {
                    match event {
                        ConnectionEvent::Diagnostic(line) => {
                            eprintln!("{}", dim.apply_to(format!("[server] {}", line)));
                        }
                        ConnectionEvent::ServerMessage(message) => {
                            eprintln!("{}", dim.apply_to(format!("[server message] {:?}", message)));
                        }
                        _ => {}
                    }
                }
            });
        }

        manager
            .connect(profile.options.clone())
            .await
            .with_context(|| format!("failed to connect to {}", profile.options.describe()))?;
        Ok((manager, profile))
    }
}
