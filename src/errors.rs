//! Error types shared across the application.

use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all orchestration failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// A tool-server or agent process could not be started.
    Launch(String),
    /// No response matched a pending tool call before its deadline.
    Timeout {
        /// Tool the call was addressed to.
        tool: String,
        /// Deadline that elapsed.
        after: Duration,
    },
    /// The tool server answered with an explicit error payload.
    RemoteTool {
        /// Tool the call was addressed to.
        tool: String,
        /// Message carried by the remote error.
        message: String,
    },
    /// The underlying process exited while a call was outstanding.
    ProcessExited(String),
    /// The bridge was disconnected while a call was outstanding.
    Disconnected(String),
    /// An operation required a live process but none is attached.
    NotConnected(String),
    /// Stream framing failure (e.g. a line exceeding the codec limit).
    Protocol(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system, pipe, or serialization failure.
    Io(String),
}

impl AppError {
    /// Whether the error is local to a single tool call and leaves the
    /// bridge usable for subsequent calls.
    #[must_use]
    pub fn is_call_scoped(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::RemoteTool { .. })
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::Timeout { tool, after } => {
                write!(f, "timeout: tool '{tool}' did not respond within {after:?}")
            }
            Self::RemoteTool { tool, message } => write!(f, "remote tool '{tool}': {message}"),
            Self::ProcessExited(msg) => write!(f, "process exited: {msg}"),
            Self::Disconnected(msg) => write!(f, "disconnected: {msg}"),
            Self::NotConnected(msg) => write!(f, "not connected: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Io(format!("json: {err}"))
    }
}
