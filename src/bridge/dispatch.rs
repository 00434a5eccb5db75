//! Inbound routing for the tool-server stream.
//!
//! [`InboundRouter`] buffers raw stdout chunks, splits them into lines with
//! [`FrameCodec`], and routes each line:
//!
//! | Line                                   | Outcome                        |
//! |----------------------------------------|--------------------------------|
//! | response whose id is pending           | [`RouteOutcome::Resolved`]     |
//! | response whose id is not pending       | [`RouteOutcome::Stale`]        |
//! | record with `method`, no pending id    | [`RouteOutcome::Notified`]     |
//! | anything else (log text, bad JSON, …)  | [`RouteOutcome::Discarded`]    |
//!
//! Nothing in this path returns an error to a caller: the server interleaves
//! diagnostics with protocol records on the same stream.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tracing::{debug, trace, warn};

use crate::bridge::message::Message;
use crate::bridge::notifications::{Notification, NotificationHub};
use crate::bridge::pending::PendingRequests;
use crate::process::{FrameCodec, ProcessEvent};
use crate::AppError;

/// What happened to one inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Completed the pending request with this id.
    Resolved(u64),
    /// A response for an id that is no longer (or never was) pending.
    Stale(u64),
    /// Published as a notification under this method.
    Notified(String),
    /// Not a protocol record; dropped.
    Discarded,
}

/// Line splitter and router for one tool-server connection.
#[derive(Debug)]
pub struct InboundRouter {
    label: String,
    codec: FrameCodec,
    buffer: BytesMut,
    pending: PendingRequests,
    hub: Arc<NotificationHub>,
}

impl InboundRouter {
    /// Create a router completing requests in `pending` and publishing to `hub`.
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        pending: PendingRequests,
        hub: Arc<NotificationHub>,
    ) -> Self {
        Self::with_codec(label, pending, hub, FrameCodec::new())
    }

    /// Same as [`Self::new`] with a custom codec (e.g. a smaller line limit).
    #[must_use]
    pub fn with_codec(
        label: impl Into<String>,
        pending: PendingRequests,
        hub: Arc<NotificationHub>,
        codec: FrameCodec,
    ) -> Self {
        Self {
            label: label.into(),
            codec,
            buffer: BytesMut::new(),
            pending,
            hub,
        }
    }

    /// Append a raw chunk and route every line it completes.
    pub async fn ingest(&mut self, chunk: &[u8]) -> Vec<RouteOutcome> {
        self.buffer.extend_from_slice(chunk);
        let label = self.label.clone();
        let lines = self.codec.drain_lines(&mut self.buffer, |err| {
            warn!(label, error = %err, "tool server framing error, skipping line");
        });

        let mut outcomes = Vec::with_capacity(lines.len());
        for line in lines {
            outcomes.push(self.route_line(&line).await);
        }
        outcomes
    }

    /// Route whatever is left in the buffer when the stream ends.
    pub async fn finish(&mut self) -> Vec<RouteOutcome> {
        let mut outcomes = Vec::new();
        loop {
            match self.codec.decode_eof(&mut self.buffer) {
                Ok(Some(line)) => outcomes.push(self.route_line(&line).await),
                Ok(None) => break,
                Err(AppError::Protocol(msg)) => {
                    warn!(label = self.label, error = msg.as_str(), "discarding oversized tail");
                }
                Err(err) => {
                    warn!(label = self.label, error = %err, "error flushing tool server stream");
                    break;
                }
            }
        }
        outcomes
    }

    /// Route a single complete line.
    pub async fn route_line(&self, line: &str) -> RouteOutcome {
        let Some(message) = Message::parse_line(line) else {
            if !line.trim().is_empty() {
                trace!(label = self.label, line, "tool server output (not a record)");
            }
            return RouteOutcome::Discarded;
        };

        if message.is_response() {
            if let Some(id) = message.numeric_id() {
                if self.pending.complete(id, message.outcome()).await {
                    return RouteOutcome::Resolved(id);
                }
                if message.method.is_none() {
                    debug!(
                        label = self.label,
                        request_id = id,
                        "response for unknown or expired request, dropping"
                    );
                    return RouteOutcome::Stale(id);
                }
            }
        }

        if let Some(method) = message.method {
            let notification = Notification::from_message(&method, message.params);
            self.hub.publish(notification);
            return RouteOutcome::Notified(method);
        }

        trace!(label = self.label, "record without method or pending id, dropping");
        RouteOutcome::Discarded
    }
}

/// Drive `router` from a process event stream until the process closes.
///
/// An unexpected exit rejects every outstanding request with
/// [`AppError::ProcessExited`] and publishes [`Notification::ProcessClosed`].
pub async fn run_dispatcher(mut router: InboundRouter, mut events: mpsc::Receiver<ProcessEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ProcessEvent::Stdout(chunk) => {
                router.ingest(&chunk).await;
            }
            ProcessEvent::Stderr(chunk) => {
                let text = String::from_utf8_lossy(&chunk);
                debug!(target: "tool_server", label = router.label, stderr = %text.trim_end());
            }
            ProcessEvent::Error(msg) => {
                warn!(label = router.label, error = msg.as_str(), "tool server process error");
            }
            ProcessEvent::Closed {
                exit_code,
                requested,
            } => {
                router.finish().await;
                if !requested {
                    warn!(label = router.label, exit_code, "tool server exited unexpectedly");
                    let rejected = router
                        .pending
                        .reject_all(|tool| {
                            AppError::ProcessExited(format!(
                                "tool server exited before '{tool}' responded"
                            ))
                        })
                        .await;
                    if rejected > 0 {
                        warn!(label = router.label, rejected, "rejected outstanding tool calls");
                    }
                    router.hub.publish(Notification::ProcessClosed { exit_code });
                }
                break;
            }
        }
    }
    debug!(label = router.label, "tool server dispatcher stopped");
}
