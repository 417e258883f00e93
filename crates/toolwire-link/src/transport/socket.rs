//! WebSocket transport, used directly and after session negotiation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{ConnectOptions, Inbound, InboundSender, Transport, TransportKind};
use crate::error::{DecodeError, Result, WireError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Normalize a direct-socket endpoint into a WebSocket URL.
///
/// A bare `host:port` becomes `ws://host:port`; `http`/`https` map to
/// `ws`/`wss`; `ws`/`wss` pass through. No path is added.
pub fn normalize_socket_url(endpoint: &str) -> Result<String> {
    let endpoint = endpoint.trim();
    let (scheme, rest) = match endpoint.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
        None => ("ws".to_string(), endpoint),
    };

    let ws_scheme = match scheme.as_str() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(WireError::connection(format!(
                "unsupported socket scheme: {}",
                other
            )));
        }
    };

    let url = format!("{}://{}", ws_scheme, rest);
    let parsed = Url::parse(&url)?;
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(WireError::connection(format!("no host in endpoint '{}'", endpoint)));
    }
    Ok(url)
}

/// A WebSocket connection to a tool server.
pub struct SocketTransport {
    kind: TransportKind,
    url: String,
    session_id: Option<String>,
    sink: Mutex<SplitSink<WsStream, WsMessage>>,
    open: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl SocketTransport {
    /// The socket URL this transport connected to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Open a socket directly against `options.endpoint`.
pub async fn connect(options: &ConnectOptions, inbound: InboundSender) -> Result<SocketTransport> {
    let url = normalize_socket_url(&options.endpoint)?;
    open_socket(TransportKind::Socket, url, &options.headers, None, inbound).await
}

/// Open a socket at `url` and start its reader task.
pub(crate) async fn open_socket(
    kind: TransportKind,
    url: String,
    headers: &[(String, String)],
    session_id: Option<String>,
    inbound: InboundSender,
) -> Result<SocketTransport> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| WireError::connection(format!("invalid socket URL '{}': {}", url, e)))?;

    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| WireError::connection(format!("invalid header name '{}': {}", key, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| WireError::connection(format!("invalid value for header '{}': {}", key, e)))?;
        request.headers_mut().insert(name, value);
    }

    tracing::info!(url = %url, kind = %kind, "opening socket");
    let (stream, _response) = connect_async(request)
        .await
        .map_err(|e| WireError::connection(format!("failed to open socket {}: {}", url, e)))?;
    tracing::info!(url = %url, "socket open");

    let (sink, stream) = stream.split();
    let open = Arc::new(AtomicBool::new(true));
    let reader = tokio::spawn(read_loop(stream, Arc::clone(&open), inbound));

    Ok(SocketTransport {
        kind,
        url,
        session_id,
        sink: Mutex::new(sink),
        open,
        reader,
    })
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    open: Arc<AtomicBool>,
    inbound: InboundSender,
) {
    let reason = loop {
        let text = match stream.next().await {
            Some(Ok(WsMessage::Text(text))) => text.as_str().to_owned(),
            Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(e) => {
                    let error = DecodeError::from(e).to_string();
                    if inbound.send(Inbound::Malformed(error)).is_err() {
                        open.store(false, Ordering::SeqCst);
                        return;
                    }
                    continue;
                }
            },
            Some(Ok(WsMessage::Close(frame))) => {
                break frame
                    .map(|f| format!("closed by server: {}", f.reason.as_str()))
                    .unwrap_or_else(|| "closed by server".to_string());
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => break format!("socket error: {}", e),
            None => break "socket stream ended".to_string(),
        };

        tracing::trace!(json = %text, "received socket message");
        if inbound.send(Inbound::Frame(text)).is_err() {
            open.store(false, Ordering::SeqCst);
            return;
        }
    };

    open.store(false, Ordering::SeqCst);
    tracing::info!(reason = %reason, "socket closed");
    let _ = inbound.send(Inbound::Closed {
        reason: Some(reason),
    });
}

#[async_trait]
impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    async fn send(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(WireError::NotConnected);
        }
        tracing::trace!(json = %text, "sending socket message");
        self.sink.lock().await.send(WsMessage::Text(text.into())).await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        let was_open = self.open.swap(false, Ordering::SeqCst);
        self.reader.abort();
        if was_open {
            let mut sink = self.sink.lock().await;
            let _ = sink.send(WsMessage::Close(None)).await;
            let _ = sink.close().await;
            tracing::info!(url = %self.url, "socket closed by client");
        }
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
