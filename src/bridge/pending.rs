//! Outstanding tool calls awaiting a correlated response.
//!
//! Each call registers a `oneshot` sender under its request id. The inbound
//! router completes it when a response with that id arrives; the caller
//! removes it on timeout. Whoever removes the entry first wins, so a late
//! response after a timeout finds nothing and is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tracing::debug;

use crate::{AppError, Result};

/// Receiver side handed to the caller of a tool call.
pub type CallReceiver = oneshot::Receiver<Result<Value>>;

#[derive(Debug)]
struct PendingRequest {
    tool: String,
    issued_at: Instant,
    tx: oneshot::Sender<Result<Value>>,
}

/// Shared map of pending requests keyed by request id.
#[derive(Debug, Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<HashMap<u64, PendingRequest>>>,
}

impl PendingRequests {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register request `id` addressed to `tool` and return its receiver.
    ///
    /// Ids come from a monotonic counter; registering an id that is still
    /// outstanding replaces the old entry, whose caller then observes a
    /// closed channel.
    pub async fn register(&self, id: u64, tool: &str) -> CallReceiver {
        let (tx, rx) = oneshot::channel();
        let previous = self.inner.lock().await.insert(
            id,
            PendingRequest {
                tool: tool.to_owned(),
                issued_at: Instant::now(),
                tx,
            },
        );
        if previous.is_some() {
            debug!(request_id = id, "pending request id reused while outstanding");
        }
        rx
    }

    /// Complete request `id` with a response outcome.
    ///
    /// A remote error message becomes [`AppError::RemoteTool`]. Returns
    /// `false` when no such request is outstanding (already timed out,
    /// never issued, or answered twice).
    pub async fn complete(&self, id: u64, outcome: std::result::Result<Value, String>) -> bool {
        let Some(entry) = self.inner.lock().await.remove(&id) else {
            return false;
        };

        debug!(
            request_id = id,
            tool = entry.tool,
            ok = outcome.is_ok(),
            elapsed_ms = u64::try_from(entry.issued_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "tool call answered"
        );

        let result = outcome.map_err(|message| AppError::RemoteTool {
            tool: entry.tool.clone(),
            message,
        });
        if entry.tx.send(result).is_err() {
            debug!(request_id = id, "caller dropped before response arrived");
        }
        true
    }

    /// Remove request `id` without completing it. Returns whether it existed.
    pub async fn remove(&self, id: u64) -> bool {
        self.inner.lock().await.remove(&id).is_some()
    }

    /// Whether request `id` is outstanding.
    pub async fn contains(&self, id: u64) -> bool {
        self.inner.lock().await.contains_key(&id)
    }

    /// Number of outstanding requests.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Whether no requests are outstanding.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Reject every outstanding request with an error built from its tool
    /// name. Returns how many were rejected.
    pub async fn reject_all(&self, make_error: impl Fn(&str) -> AppError) -> usize {
        let drained: Vec<(u64, PendingRequest)> = self.inner.lock().await.drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            if entry.tx.send(Err(make_error(&entry.tool))).is_err() {
                debug!(request_id = id, "caller dropped before rejection");
            }
        }
        count
    }
}
