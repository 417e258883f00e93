//! Credential resolution.
//!
//! Resolution order:
//! 1. `TOOLWIRE_API_KEY` environment variable
//! 2. Config file (with warning)

/// Environment variable checked before the config file.
pub const CREDENTIAL_ENV: &str = "TOOLWIRE_API_KEY";

/// Result of credential resolution with provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSecret {
    /// The secret value.
    pub value: String,
    /// Where the secret was found.
    pub source: SecretSource,
}

/// Where a secret was resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    /// Environment variable.
    EnvVar(String),
    /// Config file (plaintext, not recommended).
    ConfigFile,
    /// Command-line flag.
    Flag,
}

impl std::fmt::Display for SecretSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretSource::EnvVar(var) => write!(f, "env var {}", var),
            SecretSource::ConfigFile => write!(f, "config file (plaintext)"),
            SecretSource::Flag => write!(f, "command-line flag"),
        }
    }
}

/// Resolve the connection credential.
pub fn resolve_credential(config_value: Option<&str>) -> Option<ResolvedSecret> {
    resolve_from(std::env::var(CREDENTIAL_ENV).ok(), config_value)
}

fn resolve_from(env_value: Option<String>, config_value: Option<&str>) -> Option<ResolvedSecret> {
    if let Some(value) = env_value
        && !value.is_empty()
    {
        return Some(ResolvedSecret {
            value,
            source: SecretSource::EnvVar(CREDENTIAL_ENV.to_string()),
        });
    }

    config_value.map(|v| ResolvedSecret {
        value: v.to_string(),
        source: SecretSource::ConfigFile,
    })
}
