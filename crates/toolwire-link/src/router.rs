//! Correlation of asynchronous responses with the requests that caused them.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};

use crate::codec::{Message, RequestId};
use crate::error::{Result, WireError};
use crate::manager::ConnectionEvent;

/// Outcome of handing a response to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A waiting request received the response.
    Delivered,
    /// No request was waiting on that id.
    Unmatched,
}

/// An outstanding request awaiting its response.
#[derive(Debug)]
pub struct PendingRequest {
    tx: oneshot::Sender<Result<Value>>,
    created_at: Instant,
}

impl PendingRequest {
    /// Time since the request was registered.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Completion handle returned by [`CorrelationRouter::register`].
#[derive(Debug)]
pub struct PendingResponse {
    id: RequestId,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingResponse {
    /// The correlation id this handle waits on.
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the response.
    ///
    /// If the entry is abandoned (the connection went away before a
    /// response arrived) this never completes; callers that need a bound
    /// must layer their own deadline.
    pub async fn wait(self) -> Result<Value> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => std::future::pending().await,
        }
    }
}

/// Maps correlation ids to waiting callers.
///
/// Each entry fires at most once. Responses for ids nobody is waiting on
/// are logged and published as [`ConnectionEvent::Unmatched`].
#[derive(Debug)]
pub struct CorrelationRouter {
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl CorrelationRouter {
    /// Create a router that reports anomalies on `events`.
    pub fn new(events: broadcast::Sender<ConnectionEvent>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Register interest in the response to `id`.
    ///
    /// Fails if a request with the same id is still outstanding.
    pub fn register(&self, id: RequestId) -> Result<PendingResponse> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&id) {
            return Err(WireError::DuplicateId(id));
        }

        let (tx, rx) = oneshot::channel();
        pending.insert(
            id.clone(),
            PendingRequest {
                tx,
                created_at: Instant::now(),
            },
        );
        Ok(PendingResponse { id, rx })
    }

    /// Complete the request registered under `id` with a value.
    pub fn resolve(&self, id: &RequestId, value: Value) -> Delivery {
        self.complete(id, Ok(value))
    }

    /// Fail the request registered under `id`.
    pub fn reject(&self, id: &RequestId, error: WireError) -> Delivery {
        self.complete(id, Err(error))
    }

    /// Route a decoded response to its waiter.
    ///
    /// Returns `None` for messages that are not responses.
    pub fn route(&self, message: Message) -> Option<Delivery> {
        match message {
            Message::Result { id, result } => Some(self.resolve(&id, result)),
            Message::Error { id, error } => Some(self.reject(&id, error.into_error())),
            Message::Request { .. } | Message::Notification { .. } => None,
        }
    }

    /// Remove an entry without completing it.
    pub fn forget(&self, id: &RequestId) -> bool {
        self.pending.lock().remove(id).is_some()
    }

    /// Drop every outstanding entry without resolving or rejecting it.
    ///
    /// Waiters stay pending forever. Returns how many were abandoned.
    pub fn abandon_all(&self) -> usize {
        let abandoned: Vec<(RequestId, PendingRequest)> = self.pending.lock().drain().collect();
        for (id, request) in &abandoned {
            tracing::warn!(
                id = %id,
                age_ms = request.age().as_millis() as u64,
                "abandoning pending request"
            );
        }
        abandoned.len()
    }

    /// Number of outstanding requests.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether a request with `id` is outstanding.
    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.pending.lock().contains_key(id)
    }

    fn complete(&self, id: &RequestId, outcome: Result<Value>) -> Delivery {
        let entry = self.pending.lock().remove(id);
        match entry {
            Some(request) => {
                tracing::debug!(
                    id = %id,
                    ok = outcome.is_ok(),
                    latency_ms = request.age().as_millis() as u64,
                    "response correlated"
                );
                // The caller may have stopped waiting; that is not an anomaly.
                let _ = request.tx.send(outcome);
                Delivery::Delivered
            }
            None => {
                tracing::warn!(id = %id, "response for unknown request id");
                let _ = self.events.send(ConnectionEvent::Unmatched { id: id.clone() });
                Delivery::Unmatched
            }
        }
    }
}
