//! Turning layered configuration plus CLI flags into connect options.

use anyhow::{Context as _, Result, bail};
use toolwire_config::{SecretSource, ToolwireConfig, Transport};
use toolwire_link::{ConnectOptions, TransportKind};

/// Connection settings given on the command line. These win over every
/// config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub endpoint: Option<String>,
    pub transport: Option<String>,
    pub credential: Option<String>,
}

/// Options ready for `ConnectionManager::connect`, plus where the credential came from.
#[derive(Debug, Clone)]
pub struct Profile {
    pub options: ConnectOptions,
    pub credential_source: Option<SecretSource>,
}

fn transport_kind(transport: Transport) -> TransportKind {
    match transport {
        Transport::Session => TransportKind::Session,
        Transport::Socket => TransportKind::Socket,
        Transport::Process => TransportKind::Process,
    }
}

/// Resolve the connection profile from config and overrides.
pub fn resolve(config: &ToolwireConfig, overrides: &Overrides) -> Result<Profile> {
    let transport = match &overrides.transport {
        Some(name) => name
            .parse::<Transport>()
            .context("invalid --transport")?,
        None => config.transport(),
    };

    let Some(endpoint) = overrides
        .endpoint
        .as_deref()
        .or_else(|| config.endpoint())
        .map(str::to_string)
    else {
        bail!(
            "no endpoint configured: pass --endpoint or set [connection] endpoint in {}",
            toolwire_config::user_config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "toolwire.toml".to_string())
        );
    };

    let mut options = ConnectOptions::new(transport_kind(transport), endpoint);

    if let Some(conn) = &config.connection {
        for (name, value) in &conn.headers {
            options = options.with_header(name, value);
        }
        if let Some(timeout) = conn.request_timeout() {
            options = options.with_request_timeout(timeout);
        }
    }

    if let Some(process) = &config.process {
        if let Some(flag) = &process.invocation_flag {
            options = options.with_invocation_flag(flag);
        }
        if let Some(env) = &process.credential_env {
            options = options.with_credential_env(env);
        }
    }

    let credential = match &overrides.credential {
        Some(value) => Some((value.clone(), SecretSource::Flag)),
        None => {
            let file_value = config
                .connection
                .as_ref()
                .and_then(|c| c.credential.as_deref());
            toolwire_config::resolve_credential(file_value).map(|s| (s.value, s.source))
        }
    };

    let credential_source = match credential {
        Some((value, source)) => {
            tracing::debug!(source = %source, "resolved credential");
            options = options.with_credential(value);
            Some(source)
        }
        None => None,
    };

    Ok(Profile {
        options,
        credential_source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(toml: &str) -> ToolwireConfig {
        ToolwireConfig::from_toml(toml).unwrap()
    }

    #[test]
    fn test_config_only() {
        let config = config(
            r#"
[connection]
endpoint = "tool-server"
transport = "process"
request_timeout_secs = 3
headers = [["X-Client", "cli"]]

[process]
invocation_flag = "--pipe"
credential_env = "SERVER_KEY"
"#,
        );
        let profile = resolve(&config, &Overrides::default()).unwrap();
        let options = profile.options;
        assert_eq!(options.kind, TransportKind::Process);
        assert_eq!(options.endpoint, "tool-server");
        assert_eq!(options.invocation_flag, "--pipe");
        assert_eq!(options.credential_env, "SERVER_KEY");
        assert_eq!(options.request_timeout, Some(Duration::from_secs(3)));
        assert_eq!(options.headers, vec![("X-Client".to_string(), "cli".to_string())]);
    }

    #[test]
    fn test_overrides_win() {
        let config = config(
            r#"
[connection]
endpoint = "http://config:1"
transport = "session"
credential = "from-file"
"#,
        );
        let overrides = Overrides {
            endpoint: Some("localhost:9999".to_string()),
            transport: Some("socket".to_string()),
            credential: Some("from-flag".to_string()),
        };
        let profile = resolve(&config, &overrides).unwrap();
        assert_eq!(profile.options.kind, TransportKind::Socket);
        assert_eq!(profile.options.endpoint, "localhost:9999");
        assert_eq!(profile.options.credential.as_deref(), Some("from-flag"));
        assert_eq!(profile.credential_source, Some(SecretSource::Flag));
    }

    #[test]
    fn test_missing_endpoint() {
        let err = resolve(&ToolwireConfig::new(), &Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("no endpoint configured"));
    }

    #[test]
    fn test_invalid_transport_flag() {
        let overrides = Overrides {
            endpoint: Some("x".to_string()),
            transport: Some("pigeon".to_string()),
            credential: None,
        };
        let err = resolve(&ToolwireConfig::new(), &overrides).unwrap_err();
        assert!(err.to_string().contains("invalid --transport"));
    }
}
