//! Session-negotiated socket transport.
//!
//! Connecting is two steps:
//!
//! ```text
//! POST {endpoint}/api/session  {"apiKey": "..."}  ->  200 {"sessionId": "..."}
//! GET  ws(s)://{host}/api/ws/{sessionId}          ->  101 Switching Protocols
//! ```

use serde::{Deserialize, Serialize};
use url::Url;

use super::socket::{SocketTransport, open_socket};
use super::{ConnectOptions, InboundSender, TransportKind};
use crate::error::{Result, WireError};

/// Body of the session bootstrap request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest<'a> {
    api_key: Option<&'a str>,
}

/// Body of a successful session bootstrap response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    session_id: String,
}

/// URL of the session bootstrap endpoint.
pub fn session_url(endpoint: &str) -> Result<Url> {
    let url = format!("{}/api/session", endpoint.trim().trim_end_matches('/'));
    Ok(Url::parse(&url)?)
}

/// Derive the socket URL for a negotiated session.
///
/// The scheme is swapped to its socket equivalent and the path replaced
/// with `/api/ws/{session_id}`.
pub fn session_socket_url(endpoint: &str, session_id: &str) -> Result<String> {
    let mut url = Url::parse(endpoint.trim())?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(WireError::connection(format!(
                "unsupported session endpoint scheme: {}",
                other
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| WireError::connection("failed to set socket scheme"))?;
    url.set_path(&format!("/api/ws/{}", session_id));
    url.set_query(None);
    url.set_fragment(None);

    Ok(url.to_string())
}

/// Negotiate a session and return its id.
pub async fn bootstrap(
    http: &reqwest::Client,
    endpoint: &str,
    credential: Option<&str>,
) -> Result<String> {
    let url = session_url(endpoint)?;
    tracing::info!(url = %url, "requesting session");

    let response = http
        .post(url.clone())
        .json(&SessionRequest {
            api_key: credential,
        })
        .send()
        .await
        .map_err(|e| WireError::connection(format!("session request to {} failed: {}", url, e)))?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        return Err(WireError::connection(format!(
            "session request rejected with HTTP {}: {}",
            status, body
        )));
    }

    let session: SessionResponse = response
        .json()
        .await
        .map_err(|e| WireError::connection(format!("invalid session response: {}", e)))?;

    if session.session_id.is_empty() {
        return Err(WireError::connection("server returned an empty session id"));
    }

    tracing::debug!(session_id = %session.session_id, "session established");
    Ok(session.session_id)
}

/// Negotiate a session, then open its socket.
pub async fn connect(options: &ConnectOptions, inbound: InboundSender) -> Result<SocketTransport> {
    let http = reqwest::Client::builder()
        .timeout(options.bootstrap_timeout)
        .build()
        .map_err(|e| WireError::connection(format!("failed to build HTTP client: {}", e)))?;

    let session_id = bootstrap(&http, &options.endpoint, options.credential.as_deref()).await?;
    let url = session_socket_url(&options.endpoint, &session_id)?;

    open_socket(
        TransportKind::Session,
        url,
        &options.headers,
        Some(session_id),
        inbound,
    )
    .await
}
