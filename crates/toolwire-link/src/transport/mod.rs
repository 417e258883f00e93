//! Transport strategies for reaching a tool server.
//!
//! Three interchangeable backends sit behind the [`Transport`] trait:
//!
//! - [`TransportKind::Session`] negotiates a session over HTTP, then opens a
//!   WebSocket derived from the endpoint and session id.
//! - [`TransportKind::Socket`] opens a WebSocket directly.
//! - [`TransportKind::Process`] spawns the server and talks JSON over its
//!   stdin/stdout, with stdout passed through a [`JsonFramer`](crate::framer::JsonFramer).
//!
//! Every transport pushes what it reads onto an [`InboundSender`]; the
//! connection manager owns the receiving end.

pub mod process;
pub mod session;
pub mod socket;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::codec::WireFormat;
use crate::error::{Result, WireError};

pub use process::{DEFAULT_CREDENTIAL_ENV, DEFAULT_INVOCATION_FLAG, ProcessTransport, split_command};
pub use session::{session_socket_url, session_url};
pub use socket::{SocketTransport, normalize_socket_url};

/// Which transport strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// HTTP session bootstrap followed by a WebSocket.
    #[default]
    Session,
    /// WebSocket with no negotiation.
    Socket,
    /// Spawned subprocess over stdin/stdout.
    Process,
}

impl TransportKind {
    /// The wire dialect spoken over this transport.
    pub fn wire_format(self) -> WireFormat {
        match self {
            Self::Session | Self::Socket => WireFormat::Event,
            Self::Process => WireFormat::JsonRpc,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Socket => write!(f, "socket"),
            Self::Process => write!(f, "process"),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "socket" | "websocket" | "ws" => Ok(Self::Socket),
            "process" | "stdio" => Ok(Self::Process),
            other => Err(WireError::connection(format!(
                "unknown transport '{}' (expected session, socket or process)",
                other
            ))),
        }
    }
}

/// Lifecycle state shared by all transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Ready to exchange messages.
    Connected,
    /// The last connect attempt or the live connection failed.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting..."),
            Self::Connected => write!(f, "connected"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Data produced by a transport's reader tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// One complete message text.
    Frame(String),
    /// A frame that could not be turned into text.
    Malformed(String),
    /// Diagnostic output that is not protocol data (subprocess stderr).
    Diagnostic(String),
    /// The underlying socket or process is gone.
    Closed {
        /// Why, if known.
        reason: Option<String>,
    },
}

/// Sending half handed to transports.
pub type InboundSender = mpsc::UnboundedSender<Inbound>;

/// Options describing one logical connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Transport strategy.
    pub kind: TransportKind,
    /// URL for socket transports, command line for the process transport.
    pub endpoint: String,
    /// Credential sent during session bootstrap or injected into the subprocess.
    pub credential: Option<String>,
    /// Extra headers for the socket handshake.
    pub headers: Vec<(String, String)>,
    /// Argument appended to the subprocess command line if absent.
    pub invocation_flag: String,
    /// Environment variable that carries the credential into the subprocess.
    pub credential_env: String,
    /// Timeout for the session bootstrap HTTP request.
    pub bootstrap_timeout: Duration,
    /// Default deadline for requests; `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
}

impl ConnectOptions {
    /// Create options for the given transport and endpoint.
    pub fn new(kind: TransportKind, endpoint: impl Into<String>) -> Self {
        Self {
            kind,
            endpoint: endpoint.into(),
            credential: None,
            headers: Vec::new(),
            invocation_flag: DEFAULT_INVOCATION_FLAG.to_string(),
            credential_env: DEFAULT_CREDENTIAL_ENV.to_string(),
            bootstrap_timeout: Duration::from_secs(30),
            request_timeout: None,
        }
    }

    /// Options for a negotiated session socket.
    pub fn session(endpoint: impl Into<String>) -> Self {
        Self::new(TransportKind::Session, endpoint)
    }

    /// Options for a direct socket.
    pub fn socket(endpoint: impl Into<String>) -> Self {
        Self::new(TransportKind::Socket, endpoint)
    }

    /// Options for a piped subprocess.
    pub fn process(command: impl Into<String>) -> Self {
        Self::new(TransportKind::Process, command)
    }

    /// Set the credential.
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// Add a socket handshake header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Override the appended invocation flag. An empty flag appends nothing.
    pub fn with_invocation_flag(mut self, flag: impl Into<String>) -> Self {
        self.invocation_flag = flag.into();
        self
    }

    /// Override the credential environment variable name.
    pub fn with_credential_env(mut self, name: impl Into<String>) -> Self {
        self.credential_env = name.into();
        self
    }

    /// Set the session bootstrap timeout.
    pub fn with_bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.bootstrap_timeout = timeout;
        self
    }

    /// Set a default request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Short description for logs and errors.
    pub fn describe(&self) -> String {
        format!("{} {}", self.kind, self.endpoint)
    }
}

/// A live connection to a tool server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which strategy this is.
    fn kind(&self) -> TransportKind;

    /// Session id negotiated during connect, if any.
    fn session_id(&self) -> Option<&str> {
        None
    }

    /// Transmit one encoded message.
    async fn send(&self, text: String) -> Result<()>;

    /// Whether the socket is open or the process is still running.
    fn is_open(&self) -> bool;

    /// Close the socket or kill the process. Idempotent.
    async fn close(&self);
}

/// Open a transport for `options`, wiring its reader tasks to `inbound`.
pub async fn open(options: &ConnectOptions, inbound: InboundSender) -> Result<Box<dyn Transport>> {
    let transport: Box<dyn Transport> = match options.kind {
        TransportKind::Session => Box::new(session::connect(options, inbound).await?),
        TransportKind::Socket => Box::new(socket::connect(options, inbound).await?),
        TransportKind::Process => Box::new(process::spawn(options, inbound)?),
    };
    Ok(transport)
}
