//! Configuration for the toolwire client.
//!
//! Provides TOML-based configuration with:
//! - A `[connection]` section naming the endpoint and transport
//! - A `[process]` section for spawned servers
//! - Config file layering (user config + project-local overrides)
//! - Credential resolution (env var → config file)

pub mod discovery;
pub mod error;
pub mod secrets;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, config_dir, load_config, load_config_file,
    load_config_with_options, save_config, user_config_path,
};
pub use error::{ConfigError, Result};
pub use secrets::{CREDENTIAL_ENV, ResolvedSecret, SecretSource, resolve_credential};
pub use types::*;
