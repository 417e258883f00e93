//! Error types for connection and messaging operations.

use thiserror::Error;

use crate::codec::RequestId;

/// Result type for connection operations.
pub type Result<T> = std::result::Result<T, WireError>;

/// Error type for connection and messaging operations.
#[derive(Debug, Error)]
pub enum WireError {
    /// Session bootstrap or socket open failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Failed to spawn the server process.
    #[error("failed to spawn tool server: {0}")]
    SpawnFailed(String),

    /// Inbound bytes did not decode into a known message shape.
    #[error("protocol error: {0}")]
    Decode(#[from] DecodeError),

    /// Any other violation of the wire contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server returned a structured error for a specific request.
    #[error("server error: {message}")]
    Request {
        /// Error code, when the server supplied one.
        code: Option<i64>,
        /// Error message from the server.
        message: String,
        /// Optional additional data.
        data: Option<serde_json::Value>,
    },

    /// Subprocess exited or its pipes failed.
    #[error("process error: {0}")]
    Process(String),

    /// Operation requires an established connection.
    #[error("not connected")]
    NotConnected,

    /// A connect attempt is already in flight.
    #[error("connect already in progress")]
    ConnectInProgress,

    /// A connection with different options is already active.
    #[error("already connected to {0}")]
    AlreadyConnected(String),

    /// A request with this correlation id is still outstanding.
    #[error("request id {0} is already outstanding")]
    DuplicateId(RequestId),

    /// Caller-imposed deadline elapsed before a response arrived.
    #[error("timeout waiting for response")]
    Timeout,

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error during session bootstrap.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Endpoint could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl WireError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a spawn failed error.
    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::SpawnFailed(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a process error.
    pub fn process(msg: impl Into<String>) -> Self {
        Self::Process(msg.into())
    }

    /// Create a request error from a server-reported error payload.
    pub fn request(
        code: Option<i64>,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self::Request {
            code,
            message: message.into(),
            data,
        }
    }

    /// Whether this error was reported by the server for a single request.
    ///
    /// Such errors leave the connection usable.
    pub fn is_request_error(&self) -> bool {
        matches!(self, Self::Request { .. })
    }
}

/// Reasons an inbound payload could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload is valid JSON but not an object.
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// Object matches neither known message shape.
    #[error("unrecognized message shape (keys: {0})")]
    UnrecognizedShape(String),

    /// Frame bytes are not valid UTF-8.
    #[error("invalid UTF-8 in frame: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// Correlation id is neither a string nor an unsigned integer.
    #[error("invalid correlation id: {0}")]
    InvalidId(serde_json::Value),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WireError::spawn_failed("command not found");
        assert!(err.to_string().contains("spawn"));
        assert!(err.to_string().contains("command not found"));

        let err = WireError::request(Some(-32600), "Invalid Request", None);
        assert_eq!(err.to_string(), "server error: Invalid Request");
        assert!(err.is_request_error());

        let err = WireError::DuplicateId(RequestId::Number(7));
        assert!(err.to_string().contains('7'));
    }

    #[test]
    fn test_decode_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let decode: DecodeError = json_err.into();
        let err: WireError = decode.into();
        assert!(matches!(err, WireError::Decode(DecodeError::Json(_))));
        assert!(!err.is_request_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: WireError = io_err.into();
        assert!(matches!(err, WireError::Io(_)));
    }
}
