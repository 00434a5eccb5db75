//! Typed publish/subscribe for unsolicited tool-server messages.
//!
//! A record with a `method` and no pending `id` is converted into a
//! [`Notification`] and published once. Subscribers either follow one
//! method ([`NotificationHub::subscribe`]) or everything
//! ([`NotificationHub::subscribe_all`]).
//!
//! | Method                               | Variant                         |
//! |--------------------------------------|---------------------------------|
//! | `notifications/progress`             | [`Notification::Progress`]      |
//! | `notifications/message`              | [`Notification::Log`]           |
//! | `notifications/tools/list_changed`   | [`Notification::ToolsChanged`]  |
//! | `process/closed` *(local)*           | [`Notification::ProcessClosed`] |
//! | *(any other)*                        | [`Notification::Other`]         |

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

/// Progress report method.
pub const PROGRESS: &str = "notifications/progress";
/// Log message method.
pub const LOG_MESSAGE: &str = "notifications/message";
/// Tool catalog change method.
pub const TOOLS_CHANGED: &str = "notifications/tools/list_changed";
/// Published locally when the tool-server process exits unexpectedly.
pub const PROCESS_CLOSED: &str = "process/closed";

/// Capacity of each broadcast topic.
const TOPIC_CAPACITY: usize = 64;

/// An unsolicited message, shaped per method.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Progress of a long-running call.
    Progress {
        /// Token naming the operation, as sent by the server.
        token: Option<Value>,
        /// Units completed.
        progress: f64,
        /// Units expected, if known.
        total: Option<f64>,
        /// Optional human-readable status.
        message: Option<String>,
    },
    /// Diagnostic log line from the server.
    Log {
        /// Severity as sent (`info`, `warning`, …).
        level: String,
        /// Originating logger, if named.
        logger: Option<String>,
        /// Payload rendered as text.
        message: String,
    },
    /// The set of available tools changed.
    ToolsChanged,
    /// The tool-server process exited without being asked to.
    ProcessClosed {
        /// Exit code, `None` when killed by a signal.
        exit_code: Option<i32>,
    },
    /// Any method without a dedicated shape.
    Other {
        /// Method name.
        method: String,
        /// Raw parameters (`null` when absent).
        params: Value,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressParams {
    progress_token: Option<Value>,
    progress: f64,
    total: Option<f64>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct LogParams {
    level: String,
    logger: Option<String>,
    data: Value,
}

impl Notification {
    /// Convert a method and its params into a typed notification.
    ///
    /// Known methods with unexpected params fall back to [`Self::Other`].
    #[must_use]
    pub fn from_message(method: &str, params: Option<Value>) -> Self {
        let params = params.unwrap_or(Value::Null);
        match method {
            PROGRESS => match serde_json::from_value::<ProgressParams>(params.clone()) {
                Ok(p) => Self::Progress {
                    token: p.progress_token,
                    progress: p.progress,
                    total: p.total,
                    message: p.message,
                },
                Err(_) => Self::other(method, params),
            },
            LOG_MESSAGE => match serde_json::from_value::<LogParams>(params.clone()) {
                Ok(p) => Self::Log {
                    level: p.level,
                    logger: p.logger,
                    message: match p.data {
                        Value::String(text) => text,
                        other => other.to_string(),
                    },
                },
                Err(_) => Self::other(method, params),
            },
            TOOLS_CHANGED => Self::ToolsChanged,
            _ => Self::other(method, params),
        }
    }

    fn other(method: &str, params: Value) -> Self {
        Self::Other {
            method: method.to_owned(),
            params,
        }
    }

    /// Method name this notification is published under.
    #[must_use]
    pub fn method(&self) -> &str {
        match self {
            Self::Progress { .. } => PROGRESS,
            Self::Log { .. } => LOG_MESSAGE,
            Self::ToolsChanged => TOOLS_CHANGED,
            Self::ProcessClosed { .. } => PROCESS_CLOSED,
            Self::Other { method, .. } => method,
        }
    }
}

/// Broadcast hub keyed by method name.
#[derive(Debug)]
pub struct NotificationHub {
    topics: Mutex<HashMap<String, broadcast::Sender<Notification>>>,
    all: broadcast::Sender<Notification>,
}

impl NotificationHub {
    /// Create a hub with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        let (all, _) = broadcast::channel(TOPIC_CAPACITY);
        Self {
            topics: Mutex::new(HashMap::new()),
            all,
        }
    }

    /// Receive notifications published under `method`.
    pub fn subscribe(&self, method: &str) -> broadcast::Receiver<Notification> {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(method.to_owned())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    /// Receive every notification regardless of method.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Notification> {
        self.all.subscribe()
    }

    /// Publish `notification` once to its method topic and to the catch-all
    /// stream. Returns the number of receivers reached.
    pub fn publish(&self, notification: Notification) -> usize {
        let topic = {
            let topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
            topics.get(notification.method()).cloned()
        };

        let mut reached = 0;
        if let Some(topic) = topic {
            reached += topic.send(notification.clone()).unwrap_or(0);
        }
        reached += self.all.send(notification).unwrap_or(0);

        if reached == 0 {
            trace!("notification published with no subscribers");
        }
        reached
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}
