//! Connection manager: one logical connection to a tool server.
//!
//! The [`ConnectionManager`] selects a transport, drives the
//! connect/disconnect lifecycle, and turns the transport's inbound frames
//! into resolved requests and lifecycle events.
//!
//! # Example
//!
//! ```rust,ignore
//! use toolwire_link::{ConnectOptions, ConnectionManager};
//!
//! let manager = ConnectionManager::new();
//! manager
//!     .connect(ConnectOptions::process("tool-server").with_credential("secret"))
//!     .await?;
//!
//! let answer = manager.execute_prompt("list the files", serde_json::json!({})).await?;
//! println!("{}", answer);
//!
//! manager.disconnect().await;
//! ```
//!
//! # Pending requests and disconnects
//!
//! Requests still waiting when the connection goes away (explicit
//! [`disconnect`](ConnectionManager::disconnect) or the server dying) are
//! abandoned: they are neither resolved nor rejected. Subscribe to
//! [`ConnectionEvent::Disconnected`] or pass a deadline with
//! [`send_request_with_timeout`](ConnectionManager::send_request_with_timeout)
//! to stop waiting.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::codec::{self, Codec, Message, RequestId};
use crate::error::{Result, WireError};
use crate::router::{CorrelationRouter, PendingResponse};
use crate::transport::{
    self, ConnectOptions, ConnectionState, Inbound, Transport, TransportKind,
};

/// Capacity of the lifecycle event channel.
const EVENT_CAPACITY: usize = 256;

/// Out-of-band signals not tied to a single request.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The manager moved to a new state.
    StateChanged(ConnectionState),
    /// A connection was established.
    Connected {
        /// Transport in use.
        kind: TransportKind,
        /// Negotiated session id, for session sockets.
        session_id: Option<String>,
    },
    /// The connection ended, by request or because the peer went away.
    Disconnected {
        /// Why, when the peer went away.
        reason: Option<String>,
    },
    /// A connect attempt or the live connection failed.
    Error(String),
    /// An inbound frame could not be decoded and was dropped.
    ProtocolError(String),
    /// A response arrived for an id nobody is waiting on.
    Unmatched {
        /// The unmatched id.
        id: RequestId,
    },
    /// A request or notification initiated by the server.
    ServerMessage(Message),
    /// Diagnostic output from the server process.
    Diagnostic(String),
}

/// The live connection.
struct Active {
    generation: u64,
    options: ConnectOptions,
    transport: Arc<dyn Transport>,
    codec: Arc<Codec>,
    dispatch: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    active: Option<Active>,
    /// Generation of the connect attempt in flight, cleared by `disconnect`.
    connecting: Option<u64>,
}

struct Shared {
    inner: Mutex<Inner>,
    router: CorrelationRouter,
    events: broadcast::Sender<ConnectionEvent>,
    generation: AtomicU64,
}

impl Shared {
    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn handle_frame(&self, text: &str) {
        match codec::decode(text) {
            Err(e) => {
                tracing::warn!(error = %e, json = %text, "discarding undecodable message");
                self.emit(ConnectionEvent::ProtocolError(e.to_string()));
            }
            Ok(message) if message.is_response() => {
                self.router.route(message);
            }
            Ok(message) => {
                tracing::debug!(id = ?message.id(), "server-initiated message");
                self.emit(ConnectionEvent::ServerMessage(message));
            }
        }
    }

    /// Tear down after the transport reported it closed on its own.
    async fn connection_lost(&self, generation: u64, reason: Option<String>) {
        let active = {
            let mut inner = self.inner.lock();
            match &inner.active {
                Some(active) if active.generation == generation => {
                    inner.state = ConnectionState::Disconnected;
                    inner.active.take()
                }
                _ => None,
            }
        };

        // Superseded by a newer connection or an explicit disconnect.
        let Some(active) = active else { return };

        let reason_text = reason.as_deref().unwrap_or("connection closed");
        tracing::warn!(
            kind = %active.options.kind,
            endpoint = %active.options.endpoint,
            reason = %reason_text,
            "connection lost"
        );

        if active.options.kind == TransportKind::Process {
            self.emit(ConnectionEvent::Error(
                WireError::process(reason_text).to_string(),
            ));
        }

        let abandoned = self.router.abandon_all();
        if abandoned > 0 {
            tracing::warn!(abandoned, "pending requests abandoned by lost connection");
        }

        // This runs on the dispatch task itself, so its handle is dropped, not aborted.
        let Active { transport, .. } = active;
        transport.close().await;

        self.emit(ConnectionEvent::StateChanged(ConnectionState::Disconnected));
        self.emit(ConnectionEvent::Disconnected { reason });
    }
}

async fn dispatch_loop(shared: Arc<Shared>, generation: u64, mut inbound: mpsc::UnboundedReceiver<Inbound>) {
    while let Some(item) = inbound.recv().await {
        match item {
            Inbound::Frame(text) => shared.handle_frame(&text),
            Inbound::Malformed(error) => {
                tracing::warn!(error = %error, "discarding malformed frame");
                shared.emit(ConnectionEvent::ProtocolError(error));
            }
            Inbound::Diagnostic(line) => shared.emit(ConnectionEvent::Diagnostic(line)),
            Inbound::Closed { reason } => {
                shared.connection_lost(generation, reason).await;
                return;
            }
        }
    }
}

/// Manages a single logical connection to a tool server.
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    /// Create a disconnected manager.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                router: CorrelationRouter::new(events.clone()),
                events,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// Transport of the live connection.
    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.shared.inner.lock().active.as_ref().map(|a| a.options.kind)
    }

    /// Options of the live connection.
    pub fn options(&self) -> Option<ConnectOptions> {
        self.shared
            .inner
            .lock()
            .active
            .as_ref()
            .map(|a| a.options.clone())
    }

    /// Session id negotiated by a session socket.
    pub fn session_id(&self) -> Option<String> {
        self.shared
            .inner
            .lock()
            .active
            .as_ref()
            .and_then(|a| a.transport.session_id().map(str::to_string))
    }

    /// Number of requests waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.router.pending_count()
    }

    /// Whether messages can be exchanged right now.
    ///
    /// For the process transport this means the child is still running; for
    /// sockets, that the socket is open.
    pub fn is_connected(&self) -> bool {
        let inner = self.shared.inner.lock();
        inner.state == ConnectionState::Connected
            && inner.active.as_ref().is_some_and(|a| a.transport.is_open())
    }

    /// Establish the connection described by `options`.
    ///
    /// Connecting again with identical options while connected is a no-op.
    /// Fails with [`WireError::AlreadyConnected`] if a connection with other
    /// options is live, and with [`WireError::ConnectInProgress`] while
    /// another connect is in flight.
    pub async fn connect(&self, options: ConnectOptions) -> Result<()> {
        let (generation, stale) = {
            let mut inner = self.shared.inner.lock();
            if inner.connecting.is_some() {
                return Err(WireError::ConnectInProgress);
            }
            if let Some(active) = &inner.active
                && active.transport.is_open()
            {
                if active.options == options {
                    return Ok(());
                }
                return Err(WireError::AlreadyConnected(active.options.describe()));
            }
            let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            inner.connecting = Some(generation);
            inner.state = ConnectionState::Connecting;
            (generation, inner.active.take())
        };

        if let Some(stale) = stale {
            stale.dispatch.abort();
            stale.transport.close().await;
            self.shared.router.abandon_all();
        }

        self.shared
            .emit(ConnectionEvent::StateChanged(ConnectionState::Connecting));
        tracing::info!(kind = %options.kind, endpoint = %options.endpoint, "connecting");

        let (tx, rx) = mpsc::unbounded_channel();

        let transport: Arc<dyn Transport> = match transport::open(&options, tx).await {
            Ok(transport) => Arc::from(transport),
            Err(e) => {
                self.fail_connect(generation, &options, &e);
                return Err(e);
            }
        };

        let kind = transport.kind();
        let session_id = transport.session_id().map(str::to_string);
        let codec = Arc::new(Codec::new(kind.wire_format()));

        let cancelled = {
            let mut inner = self.shared.inner.lock();
            if inner.connecting == Some(generation) {
                inner.connecting = None;
                inner.state = ConnectionState::Connected;
                // Spawned under the lock so a close reported straight away
                // finds this connection installed.
                let dispatch = tokio::spawn(dispatch_loop(Arc::clone(&self.shared), generation, rx));
                inner.active = Some(Active {
                    generation,
                    options,
                    transport,
                    codec,
                    dispatch,
                });
                tracing::info!(kind = %kind, session_id = ?session_id, "connected");
                self.shared
                    .emit(ConnectionEvent::StateChanged(ConnectionState::Connected));
                self.shared
                    .emit(ConnectionEvent::Connected { kind, session_id });
                None
            } else {
                Some(transport)
            }
        };

        // disconnect() ran while this attempt was in flight.
        if let Some(transport) = cancelled {
            transport.close().await;
            return Err(WireError::connection("connect cancelled by disconnect"));
        }
        Ok(())
    }

    fn fail_connect(&self, generation: u64, options: &ConnectOptions, error: &WireError) {
        tracing::error!(
            kind = %options.kind,
            endpoint = %options.endpoint,
            error = %error,
            "connect failed"
        );
        {
            let mut inner = self.shared.inner.lock();
            if inner.connecting != Some(generation) {
                // Cancelled by disconnect; the state belongs to someone else now.
                return;
            }
            inner.connecting = None;
            inner.state = ConnectionState::Failed;
        }
        self.shared
            .emit(ConnectionEvent::StateChanged(ConnectionState::Failed));
        self.shared.emit(ConnectionEvent::Error(error.to_string()));
    }

    /// Close the socket or kill the process.
    ///
    /// Requests still waiting are abandoned, not rejected.
    pub async fn disconnect(&self) {
        let (active, previous) = {
            let mut inner = self.shared.inner.lock();
            let previous = inner.state;
            inner.state = ConnectionState::Disconnected;
            inner.connecting = None;
            (inner.active.take(), previous)
        };

        if let Some(active) = active {
            active.dispatch.abort();
            active.transport.close().await;
            tracing::info!(kind = %active.options.kind, "disconnected");
        }

        let abandoned = self.shared.router.abandon_all();
        if abandoned > 0 {
            tracing::warn!(abandoned, "pending requests abandoned by disconnect");
        }

        if previous != ConnectionState::Disconnected {
            self.shared
                .emit(ConnectionEvent::StateChanged(ConnectionState::Disconnected));
            self.shared
                .emit(ConnectionEvent::Disconnected { reason: None });
        }
    }

    fn connection(&self) -> Result<(Arc<dyn Transport>, Arc<Codec>, Option<Duration>)> {
        let inner = self.shared.inner.lock();
        match &inner.active {
            Some(active)
                if inner.state == ConnectionState::Connected && active.transport.is_open() =>
            {
                Ok((
                    Arc::clone(&active.transport),
                    Arc::clone(&active.codec),
                    active.options.request_timeout,
                ))
            }
            _ => Err(WireError::NotConnected),
        }
    }

    /// Build a request with a fresh id for the live connection.
    pub fn new_request(&self, method: impl Into<String>, params: Option<Value>) -> Result<Message> {
        let (_, codec, _) = self.connection()?;
        Ok(codec.request(method, params))
    }

    /// Send a request and wait for its response.
    ///
    /// Waits indefinitely unless the connection was opened with a request
    /// timeout.
    pub async fn send_request(&self, request: Message) -> Result<Value> {
        let (pending, timeout) = self.transmit(request).await?;
        match timeout {
            Some(timeout) => self.wait_with_timeout(pending, timeout).await,
            None => pending.wait().await,
        }
    }

    /// Send a request and wait at most `timeout` for its response.
    pub async fn send_request_with_timeout(
        &self,
        request: Message,
        timeout: Duration,
    ) -> Result<Value> {
        let (pending, _) = self.transmit(request).await?;
        self.wait_with_timeout(pending, timeout).await
    }

    /// Build a request for `method` and wait for its response.
    pub async fn request(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        let request = self.new_request(method, params)?;
        self.send_request(request).await
    }

    /// Send a notification; no response is expected.
    pub async fn notify(&self, method: impl Into<String>, params: Option<Value>) -> Result<()> {
        let (transport, codec, _) = self.connection()?;
        let text = codec.encode(&Message::notification(method, params))?;
        transport.send(text).await
    }

    /// Send a prompt and return the server's answer as plain text.
    ///
    /// The request shape follows the transport's dialect: `prompt` for
    /// sockets, `generate` for the process transport.
    pub async fn execute_prompt(&self, prompt: &str, context: Value) -> Result<String> {
        let (_, codec, _) = self.connection()?;
        let request = codec.prompt(prompt, context);
        let result = self.send_request(request).await?;
        Ok(codec::prompt_text(result))
    }

    async fn transmit(&self, request: Message) -> Result<(PendingResponse, Option<Duration>)> {
        let (transport, codec, timeout) = self.connection()?;

        let id = match &request {
            Message::Request { id, .. } => id.clone(),
            _ => {
                return Err(WireError::protocol(
                    "only request messages can be sent with send_request",
                ));
            }
        };

        let text = codec.encode(&request)?;
        let pending = self.shared.router.register(id.clone())?;

        if let Err(e) = transport.send(text).await {
            self.shared.router.forget(&id);
            return Err(e);
        }

        tracing::debug!(id = %id, "request sent");
        Ok((pending, timeout))
    }

    async fn wait_with_timeout(&self, pending: PendingResponse, timeout: Duration) -> Result<Value> {
        let id = pending.id().clone();
        match tokio::time::timeout(timeout, pending.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.shared.router.forget(&id);
                tracing::warn!(id = %id, timeout_ms = timeout.as_millis() as u64, "request timed out");
                Err(WireError::Timeout)
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(active) = self.shared.inner.lock().active.take() {
            tracing::debug!(kind = %active.options.kind, "dropping connection manager, closing connection");
            active.dispatch.abort();
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("ConnectionManager")
            .field("state", &inner.state)
            .field(
                "connection",
                &inner.active.as_ref().map(|a| a.options.describe()),
            )
            .field("pending", &self.shared.router.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_manager_disconnected() {
        let manager = ConnectionManager::new();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_connected());
        assert_eq!(manager.transport_kind(), None);
        assert_eq!(manager.session_id(), None);
        assert_eq!(manager.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let manager = ConnectionManager::new();
        assert!(matches!(
            manager.request("tools/list", None).await,
            Err(WireError::NotConnected)
        ));
        assert!(matches!(
            manager.execute_prompt("hi", json!({})).await,
            Err(WireError::NotConnected)
        ));
        assert!(matches!(
            manager.notify("ping", None).await,
            Err(WireError::NotConnected)
        ));
        let request = Message::Request {
            id: 1.into(),
            method: "x".to_string(),
            params: None,
        };
        assert!(matches!(
            manager.send_request(request).await,
            Err(WireError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_failed_connect_reports_error() {
        let manager = ConnectionManager::new();
        let mut events = manager.subscribe();

        let result = manager
            .connect(ConnectOptions::process("nonexistent-tool-server-12345"))
            .await;
        assert!(matches!(result, Err(WireError::SpawnFailed(_))));
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert!(!manager.is_connected());

        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::StateChanged(ConnectionState::Connecting)
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::StateChanged(ConnectionState::Failed)
        );
        assert!(matches!(events.recv().await.unwrap(), ConnectionEvent::Error(_)));
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_is_quiet() {
        let manager = ConnectionManager::new();
        let mut events = manager.subscribe();
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_debug_format() {
        let manager = ConnectionManager::new();
        let debug = format!("{:?}", manager);
        assert!(debug.contains("ConnectionManager"));
        assert!(debug.contains("Disconnected"));
    }
}
