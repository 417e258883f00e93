//! Configuration types.
//!
//! ```toml
//! [connection]
//! endpoint = "https://tools.example.com"
//! transport = "session"
//! request_timeout_secs = 30
//! headers = [["X-Client", "toolwire"]]
//!
//! [process]
//! invocation_flag = "--stdio"
//! credential_env = "TOOL_SERVER_API_KEY"
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolwireConfig {
    /// How to reach the tool server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionConfig>,

    /// Settings that only apply to spawned servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessConfig>,
}

impl ToolwireConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one, field by field (other takes priority).
    pub fn merge(&mut self, other: ToolwireConfig) {
        match (&mut self.connection, other.connection) {
            (Some(base), Some(layer)) => base.merge(layer),
            (base, Some(layer)) => *base = Some(layer),
            (_, None) => {}
        }

        match (&mut self.process, other.process) {
            (Some(base), Some(layer)) => base.merge(layer),
            (base, Some(layer)) => *base = Some(layer),
            (_, None) => {}
        }
    }

    /// The configured endpoint, if any.
    pub fn endpoint(&self) -> Option<&str> {
        self.connection.as_ref()?.endpoint.as_deref()
    }

    /// The configured transport, defaulting to a session socket.
    pub fn transport(&self) -> Transport {
        self.connection
            .as_ref()
            .and_then(|c| c.transport)
            .unwrap_or_default()
    }

    /// Whether a credential is stored in plaintext.
    pub fn has_plaintext_credential(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.credential.is_some())
    }

    /// A starter config with every section present.
    pub fn template() -> Self {
        Self {
            connection: Some(ConnectionConfig {
                endpoint: Some("http://localhost:8080".to_string()),
                transport: Some(Transport::Session),
                credential: None,
                request_timeout_secs: None,
                headers: Vec::new(),
            }),
            process: Some(ProcessConfig {
                invocation_flag: Some(DEFAULT_INVOCATION_FLAG.to_string()),
                credential_env: Some(DEFAULT_CREDENTIAL_ENV.to_string()),
            }),
        }
    }
}

/// Default `[process] invocation_flag`.
pub const DEFAULT_INVOCATION_FLAG: &str = "--stdio";

/// Default `[process] credential_env`.
pub const DEFAULT_CREDENTIAL_ENV: &str = "TOOL_SERVER_API_KEY";

/// Transport named in `[connection] transport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// HTTP session bootstrap, then a socket.
    #[default]
    Session,
    /// Direct socket.
    Socket,
    /// Spawned subprocess.
    Process,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Socket => write!(f, "socket"),
            Self::Process => write!(f, "process"),
        }
    }
}

impl FromStr for Transport {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "socket" => Ok(Self::Socket),
            "process" => Ok(Self::Process),
            _ => Err(ConfigError::InvalidTransport(s.to_string())),
        }
    }
}

/// `[connection]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// URL for socket transports, command line for the process transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Transport strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<Transport>,

    /// Credential in plaintext. Prefer the environment variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,

    /// Default request deadline; absent means wait indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    /// Extra socket handshake headers as `[name, value]` pairs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
}

impl ConnectionConfig {
    fn merge(&mut self, other: ConnectionConfig) {
        if other.endpoint.is_some() {
            self.endpoint = other.endpoint;
        }
        if other.transport.is_some() {
            self.transport = other.transport;
        }
        if other.credential.is_some() {
            self.credential = other.credential;
        }
        if other.request_timeout_secs.is_some() {
            self.request_timeout_secs = other.request_timeout_secs;
        }
        if !other.headers.is_empty() {
            self.headers = other.headers;
        }
    }

    /// Request deadline as a [`Duration`].
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

/// `[process]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Argument appended to the spawn command when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_flag: Option<String>,

    /// Environment variable the credential is passed in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_env: Option<String>,
}

impl ProcessConfig {
    fn merge(&mut self, other: ProcessConfig) {
        if other.invocation_flag.is_some() {
            self.invocation_flag = other.invocation_flag;
        }
        if other.credential_env.is_some() {
            self.credential_env = other.credential_env;
        }
    }
}
