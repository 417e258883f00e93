//! Connection core for tool-execution servers.
//!
//! This crate establishes and maintains one logical connection to a tool
//! server, whichever way the server is reached, and correlates the
//! asynchronous responses it sends back with the requests that caused them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ConnectionManager                                          │
//! │  - connect / disconnect / is_connected                      │
//! │  - send_request, execute_prompt, notify                     │
//! │  - lifecycle events on a broadcast channel                  │
//! └─────────────────────────────────────────────────────────────┘
//!            │                                   ▲
//!            ▼                                   │
//! ┌──────────────────────────┐     ┌──────────────────────────┐
//! │  Codec                   │     │  CorrelationRouter       │
//! │  - event / JSON-RPC      │     │  - id -> waiting caller  │
//! │    dialects              │     │  - unmatched reporting   │
//! └──────────────────────────┘     └──────────────────────────┘
//!            │                                   ▲
//!            ▼                                   │
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Transport                                                  │
//! │  - session: HTTP bootstrap + WebSocket                      │
//! │  - socket: direct WebSocket                                 │
//! │  - process: stdin/stdout of a child, stdout via JsonFramer  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use toolwire_link::{ConnectOptions, ConnectionEvent, ConnectionManager};
//!
//! let manager = ConnectionManager::new();
//! let mut events = manager.subscribe();
//!
//! manager
//!     .connect(ConnectOptions::session("https://tools.example.com").with_credential(key))
//!     .await?;
//!
//! let answer = manager.execute_prompt("summarize README.md", json!({})).await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let ConnectionEvent::Disconnected { reason } = event {
//!         eprintln!("lost connection: {:?}", reason);
//!         break;
//!     }
//! }
//! ```
//!
//! # Wire dialects
//!
//! Socket transports speak the event dialect:
//!
//! ```text
//! {"type": "prompt", "messageId": 1, "content": {"prompt": "...", "context": {}}}
//! {"type": "response", "messageId": 1, "content": "..."}
//! ```
//!
//! The process transport speaks JSON-RPC 2.0, one object per line on
//! stdin, unframed on stdout:
//!
//! ```text
//! {"jsonrpc": "2.0", "id": 1, "method": "generate", "params": {...}}
//! {"jsonrpc": "2.0", "id": 1, "result": "..."}
//! ```

pub mod codec;
pub mod error;
pub mod framer;
pub mod manager;
pub mod router;
pub mod transport;

pub use codec::{Codec, ErrorPayload, Message, RequestId, WireFormat, decode, prompt_text};
pub use error::{DecodeError, Result, WireError};
pub use framer::JsonFramer;
pub use manager::{ConnectionEvent, ConnectionManager};
pub use router::{CorrelationRouter, Delivery, PendingRequest, PendingResponse};
pub use transport::{
    ConnectOptions, ConnectionState, Inbound, InboundSender, Transport, TransportKind,
};
