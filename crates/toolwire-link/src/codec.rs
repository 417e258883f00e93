//! Message codec for the two wire dialects spoken by tool servers.
//!
//! Socket transports use the event dialect:
//!
//! ```text
//! {"type": "prompt", "messageId": 1, "content": {...}}
//! {"type": "response" | "error", "messageId": 1, "content": ...}
//! ```
//!
//! The piped-process transport uses JSON-RPC style frames:
//!
//! ```text
//! {"jsonrpc": "2.0", "id": 1, "method": "generate", "params": {...}}
//! {"id": 1, "result": {...}}  or  {"id": 1, "error": {"message": "..."}}
//! ```
//!
//! Both dialects decode into the same [`Message`] union.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{DecodeError, Result, WireError};

/// JSON-RPC version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Prompt method name in the event dialect.
pub const PROMPT_METHOD: &str = "prompt";

/// Prompt method name in the JSON-RPC dialect.
pub const GENERATE_METHOD: &str = "generate";

/// Standard JSON-RPC internal error code, used when encoding an error without one.
const INTERNAL_ERROR: i64 = -32603;

// ─────────────────────────────────────────────────────────────────────────────
// Core types
// ─────────────────────────────────────────────────────────────────────────────

/// Correlation id echoed back by the server in its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id, as produced by [`Codec`].
    Number(u64),
    /// String id, accepted from servers that use them.
    String(String),
}

impl RequestId {
    /// Interpret a JSON value as a correlation id.
    pub fn from_value(value: Value) -> std::result::Result<Self, DecodeError> {
        match value {
            Value::Number(n) => match n.as_u64() {
                Some(id) => Ok(Self::Number(id)),
                None => Err(DecodeError::InvalidId(Value::Number(n))),
            },
            Value::String(s) => Ok(Self::String(s)),
            other => Err(DecodeError::InvalidId(other)),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::String(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self::String(id)
    }
}

/// Which response shape a transport speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// `{type, messageId, content}` frames.
    #[default]
    Event,
    /// `{id, method, params}` / `{id, result|error}` frames.
    JsonRpc,
}

/// Error payload carried by an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code, if the server sent one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    /// Human-readable message.
    pub message: String,
    /// Optional additional data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorPayload {
    /// Create a payload with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            data: None,
        }
    }

    /// Build a payload from whatever the server put in its error field.
    ///
    /// Accepts a bare string, an object with `message` (and optionally
    /// `code`/`data`), or anything else rendered as JSON text.
    pub fn from_value(value: Option<Value>) -> Self {
        match value {
            Some(Value::String(message)) => Self::new(message),
            Some(Value::Object(mut obj)) => match obj.remove("message") {
                Some(Value::String(message)) => Self {
                    code: obj.get("code").and_then(Value::as_i64),
                    message,
                    data: obj.remove("data"),
                },
                other => {
                    if let Some(message) = other {
                        obj.insert("message".to_string(), message);
                    }
                    Self::new(Value::Object(obj).to_string())
                }
            },
            Some(other) => Self::new(other.to_string()),
            None => Self::new("unknown error"),
        }
    }

    /// Convert into the request error that rejects the waiting caller.
    pub fn into_error(self) -> WireError {
        WireError::request(self.code, self.message, self.data)
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A call expecting a response.
    Request {
        /// Correlation id.
        id: RequestId,
        /// Method name.
        method: String,
        /// Method parameters.
        params: Option<Value>,
    },
    /// A one-way message; never correlated.
    Notification {
        /// Method name.
        method: String,
        /// Method parameters.
        params: Option<Value>,
    },
    /// A successful response.
    Result {
        /// Id of the request this answers.
        id: RequestId,
        /// Result value.
        result: Value,
    },
    /// An error response.
    Error {
        /// Id of the request this answers.
        id: RequestId,
        /// Error payload.
        error: ErrorPayload,
    },
}

impl Message {
    /// Create a notification.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification {
            method: method.into(),
            params,
        }
    }

    /// The correlation id, if this message carries one.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request { id, .. } | Self::Result { id, .. } | Self::Error { id, .. } => Some(id),
            Self::Notification { .. } => None,
        }
    }

    /// Whether this message answers an earlier request.
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Result { .. } | Self::Error { .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Codec
// ─────────────────────────────────────────────────────────────────────────────

/// Encodes outgoing messages for one wire dialect and hands out request ids.
///
/// Each codec owns its own id counter, so independent connections never
/// share an id space.
#[derive(Debug)]
pub struct Codec {
    format: WireFormat,
    next_id: AtomicU64,
}

impl Codec {
    /// Create a codec for the given dialect. Ids start at 1.
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            next_id: AtomicU64::new(1),
        }
    }

    /// The dialect this codec encodes.
    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Draw the next correlation id.
    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Build a request with a fresh id.
    pub fn request(&self, method: impl Into<String>, params: Option<Value>) -> Message {
        Message::Request {
            id: self.next_id(),
            method: method.into(),
            params,
        }
    }

    /// Build the prompt request shape appropriate for this dialect.
    pub fn prompt(&self, prompt: &str, context: Value) -> Message {
        let method = match self.format {
            WireFormat::Event => PROMPT_METHOD,
            WireFormat::JsonRpc => GENERATE_METHOD,
        };
        self.request(method, Some(json!({ "prompt": prompt, "context": context })))
    }

    /// Encode a message as wire text.
    pub fn encode(&self, message: &Message) -> Result<String> {
        let text = match self.format {
            WireFormat::Event => serde_json::to_string(&EventFrame::from_message(message))?,
            WireFormat::JsonRpc => serde_json::to_string(&RpcFrame::from_message(message))?,
        };
        Ok(text)
    }

    /// Decode wire text in either dialect.
    pub fn decode(&self, text: &str) -> std::result::Result<Message, DecodeError> {
        decode(text)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventFrame<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<&'a RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Value>,
}

impl<'a> EventFrame<'a> {
    fn from_message(message: &'a Message) -> Self {
        match message {
            Message::Request { id, method, params } => Self {
                kind: method,
                message_id: Some(id),
                content: params.clone(),
            },
            Message::Notification { method, params } => Self {
                kind: method,
                message_id: None,
                content: params.clone(),
            },
            Message::Result { id, result } => Self {
                kind: "response",
                message_id: Some(id),
                content: Some(result.clone()),
            },
            Message::Error { id, error } => Self {
                kind: "error",
                message_id: Some(id),
                content: Some(Value::String(error.message.clone())),
            },
        }
    }
}

#[derive(Serialize)]
struct RpcFrame<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorPayload>,
}

impl<'a> RpcFrame<'a> {
    fn from_message(message: &'a Message) -> Self {
        let mut frame = Self {
            jsonrpc: JSONRPC_VERSION,
            id: message.id(),
            method: None,
            params: None,
            result: None,
            error: None,
        };
        match message {
            Message::Request { method, params, .. } | Message::Notification { method, params } => {
                frame.method = Some(method.as_str());
                frame.params = params.as_ref();
            }
            Message::Result { result, .. } => frame.result = Some(result),
            Message::Error { error, .. } => {
                let mut error = error.clone();
                error.code.get_or_insert(INTERNAL_ERROR);
                frame.error = Some(error);
            }
        }
        frame
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Decode wire text in either dialect into a [`Message`].
///
/// An object is read as an event frame when it has a string `type` and none
/// of the JSON-RPC keys `method`, `result`, `error`. JSON-RPC errors with a
/// null or missing id are surfaced as an `error` notification.
pub fn decode(text: &str) -> std::result::Result<Message, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    let obj = match value {
        Value::Object(obj) => obj,
        other => return Err(DecodeError::NotAnObject(json_kind(&other))),
    };

    let is_event = matches!(obj.get("type"), Some(Value::String(_)))
        && !["method", "result", "error"]
            .iter()
            .any(|key| obj.contains_key(*key));

    if is_event {
        decode_event(obj)
    } else {
        decode_rpc(obj)
    }
}

fn decode_event(mut obj: Map<String, Value>) -> std::result::Result<Message, DecodeError> {
    let kind = match obj.remove("type") {
        Some(Value::String(kind)) => kind,
        _ => return Err(unrecognized(&obj)),
    };
    let id = take_id(&mut obj, "messageId")?;
    let content = obj.remove("content");

    Ok(match (kind.as_str(), id) {
        ("response", Some(id)) => Message::Result {
            id,
            result: content.unwrap_or(Value::Null),
        },
        ("error", Some(id)) => Message::Error {
            id,
            error: ErrorPayload::from_value(content),
        },
        (_, Some(id)) => Message::Request {
            id,
            method: kind,
            params: content,
        },
        (_, None) => Message::Notification {
            method: kind,
            params: content,
        },
    })
}

fn decode_rpc(mut obj: Map<String, Value>) -> std::result::Result<Message, DecodeError> {
    let id = take_id(&mut obj, "id")?;

    match obj.remove("method") {
        Some(Value::String(method)) => {
            let params = obj.remove("params");
            return Ok(match id {
                Some(id) => Message::Request { id, method, params },
                None => Message::Notification { method, params },
            });
        }
        Some(other) => {
            obj.insert("method".to_string(), other);
            return Err(unrecognized(&obj));
        }
        None => {}
    }

    if let Some(error) = obj.remove("error") {
        return Ok(match id {
            Some(id) => Message::Error {
                id,
                error: ErrorPayload::from_value(Some(error)),
            },
            None => Message::notification("error", Some(error)),
        });
    }

    match (id, obj.remove("result")) {
        (Some(id), Some(result)) => Ok(Message::Result { id, result }),
        (id, result) => {
            if let Some(id) = id {
                obj.insert("id".to_string(), serde_json::to_value(id)?);
            }
            if let Some(result) = result {
                obj.insert("result".to_string(), result);
            }
            Err(unrecognized(&obj))
        }
    }
}

fn take_id(
    obj: &mut Map<String, Value>,
    key: &str,
) -> std::result::Result<Option<RequestId>, DecodeError> {
    match obj.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => RequestId::from_value(value).map(Some),
    }
}

fn unrecognized(obj: &Map<String, Value>) -> DecodeError {
    let keys: Vec<&str> = obj.keys().map(String::as_str).collect();
    DecodeError::UnrecognizedShape(keys.join(", "))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Unwrap a prompt result into plain text.
///
/// Strings pass through; objects yield their `response` (or `text`) field;
/// anything else is rendered as JSON.
pub fn prompt_text(result: Value) -> String {
    match result {
        Value::String(text) => text,
        Value::Object(mut obj) => match obj.remove("response").or_else(|| obj.remove("text")) {
            Some(Value::String(text)) => text,
            Some(other) => other.to_string(),
            None => Value::Object(obj).to_string(),
        },
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_increment() {
        let codec = Codec::new(WireFormat::JsonRpc);
        assert_eq!(codec.next_id(), RequestId::Number(1));
        assert_eq!(codec.next_id(), RequestId::Number(2));

        let other = Codec::new(WireFormat::JsonRpc);
        assert_eq!(other.next_id(), RequestId::Number(1));
    }

    #[test]
    fn test_encode_rpc_prompt() {
        let codec = Codec::new(WireFormat::JsonRpc);
        let message = codec.prompt("hello", json!({"cwd": "/tmp"}));
        let text = codec.encode(&message).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["id"], 1);
        assert_eq!(value["method"], "generate");
        assert_eq!(value["params"]["prompt"], "hello");
        assert_eq!(value["params"]["context"]["cwd"], "/tmp");
    }

    #[test]
    fn test_encode_event_prompt() {
        let codec = Codec::new(WireFormat::Event);
        let message = codec.prompt("hello", Value::Null);
        let text = codec.encode(&message).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "prompt");
        assert_eq!(value["messageId"], 1);
        assert_eq!(value["content"]["prompt"], "hello");
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_notification_has_no_id() {
        let codec = Codec::new(WireFormat::JsonRpc);
        let text = codec
            .encode(&Message::notification("initialized", None))
            .unwrap();
        assert!(!text.contains("\"id\""));
        assert!(!text.contains("params"));

        let codec = Codec::new(WireFormat::Event);
        let text = codec.encode(&Message::notification("ping", None)).unwrap();
        assert_eq!(text, r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_encode_rpc_error_defaults_code() {
        let codec = Codec::new(WireFormat::JsonRpc);
        let message = Message::Error {
            id: 3.into(),
            error: ErrorPayload::new("nope"),
        };
        let value: Value = serde_json::from_str(&codec.encode(&message).unwrap()).unwrap();
        assert_eq!(value["error"]["code"], -32603);
        assert_eq!(value["error"]["message"], "nope");
    }

    #[test]
    fn test_decode_event_response() {
        let msg = decode(r#"{"type":"response","messageId":5,"content":"done"}"#).unwrap();
        assert_eq!(
            msg,
            Message::Result {
                id: 5.into(),
                result: json!("done")
            }
        );
    }

    #[test]
    fn test_decode_event_error() {
        let msg = decode(r#"{"type":"error","messageId":"m-1","content":"boom"}"#).unwrap();
        match msg {
            Message::Error { id, error } => {
                assert_eq!(id, RequestId::from("m-1"));
                assert_eq!(error.message, "boom");
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_event_without_id_is_notification() {
        let msg = decode(r#"{"type":"status","content":{"busy":true}}"#).unwrap();
        assert!(matches!(msg, Message::Notification { ref method, .. } if method == "status"));
        assert!(msg.id().is_none());
    }

    #[test]
    fn test_decode_rpc_result_and_error() {
        let msg = decode(r#"{"id":1,"result":{"response":"ok"}}"#).unwrap();
        assert!(msg.is_response());
        assert_eq!(msg.id(), Some(&RequestId::Number(1)));

        let msg = decode(r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"bad"}}"#)
            .unwrap();
        match msg {
            Message::Error { id, error } => {
                assert_eq!(id, RequestId::Number(2));
                assert_eq!(error.code, Some(-32601));
                assert_eq!(error.message, "bad");
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rpc_requests_from_server() {
        let msg = decode(r#"{"id":9,"method":"ping"}"#).unwrap();
        assert!(matches!(msg, Message::Request { ref method, .. } if method == "ping"));

        let msg = decode(r#"{"method":"log","params":{"line":"x"}}"#).unwrap();
        assert!(matches!(msg, Message::Notification { .. }));
    }

    #[test]
    fn test_decode_rpc_error_without_id() {
        let msg = decode(r#"{"id":null,"error":{"code":-32700,"message":"parse"}}"#).unwrap();
        assert!(matches!(msg, Message::Notification { ref method, .. } if method == "error"));
    }

    #[test]
    fn test_decode_rejects_unknown_shapes() {
        assert!(matches!(decode("[1,2]"), Err(DecodeError::NotAnObject("array"))));
        assert!(matches!(decode("{not json"), Err(DecodeError::Json(_))));
        assert!(matches!(
            decode(r#"{"hello":"world"}"#),
            Err(DecodeError::UnrecognizedShape(_))
        ));
        assert!(matches!(
            decode(r#"{"id":1}"#),
            Err(DecodeError::UnrecognizedShape(_))
        ));
        assert!(matches!(
            decode(r#"{"id":-4,"result":1}"#),
            Err(DecodeError::InvalidId(_))
        ));
        assert!(matches!(
            decode(r#"{"method":7}"#),
            Err(DecodeError::UnrecognizedShape(_))
        ));
    }

    #[test]
    fn test_error_payload_shapes() {
        assert_eq!(ErrorPayload::from_value(Some(json!("x"))).message, "x");
        let payload = ErrorPayload::from_value(Some(json!({"code": 4, "message": "y"})));
        assert_eq!(payload.code, Some(4));
        assert_eq!(payload.message, "y");
        assert_eq!(
            ErrorPayload::from_value(Some(json!({"reason": "z"}))).message,
            r#"{"reason":"z"}"#
        );
        assert_eq!(ErrorPayload::from_value(None).message, "unknown error");
    }

    #[test]
    fn test_prompt_text() {
        assert_eq!(prompt_text(json!("plain")), "plain");
        assert_eq!(prompt_text(json!({"response": "ok"})), "ok");
        assert_eq!(prompt_text(json!({"text": "t"})), "t");
        assert_eq!(prompt_text(json!({"other": 1})), r#"{"other":1}"#);
        assert_eq!(prompt_text(Value::Null), "");
    }
}
