//! Wire records exchanged with the tool server.
//!
//! Every record is one line of JSON:
//!
//! | Direction | Shape                                              |
//! |-----------|----------------------------------------------------|
//! | request   | `{"id":N,"method":"tools/call","params":{..}}`     |
//! | response  | `{"id":N,"result":..}` or `{"id":N,"error":{..}}` |
//! | notice    | `{"method":"..","params":..}` (no pending `id`)    |
//!
//! The server shares its stdout with human-readable diagnostics, so inbound
//! lines are screened with a cheap prefix test before any parsing.

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::trace;

use crate::Result;

/// Method used for every tool invocation.
pub const TOOLS_CALL: &str = "tools/call";

/// Method used to enumerate the server's tools.
pub const TOOLS_LIST: &str = "tools/list";

/// One protocol record.
///
/// Absent fields are omitted on the wire. `result` distinguishes "absent"
/// from an explicit `null`: a response carrying `"result": null` parses to
/// `Some(Value::Null)`. An explicit `"error": null` parses as no error.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Message {
    /// Correlation id; numeric for every request this crate issues.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Request or notification method.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Successful response payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error response payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Message {
    /// Build a request record.
    #[must_use]
    pub fn request(id: u64, method: &str, params: Value) -> Self {
        Self {
            id: Some(Value::from(id)),
            method: Some(method.to_owned()),
            params: Some(params),
            ..Self::default()
        }
    }

    /// Build a `tools/call` request for `name` with `arguments`.
    #[must_use]
    pub fn tool_call(id: u64, name: &str, arguments: Value) -> Self {
        Self::request(id, TOOLS_CALL, json!({ "name": name, "arguments": arguments }))
    }

    /// Serialize as a single line without the trailing newline.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`](crate::AppError::Io) if serialization fails.
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Numeric correlation id, if present.
    #[must_use]
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.as_ref().and_then(Value::as_u64)
    }

    /// Whether this record answers a request.
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.id.is_some() && (self.result.is_some() || self.error.is_some())
    }

    /// Outcome carried by a response: the result payload, or the remote
    /// error message.
    #[must_use]
    pub fn outcome(&self) -> std::result::Result<Value, String> {
        match &self.error {
            Some(err) => Err(error_message(err)),
            None => Ok(self.result.clone().unwrap_or(Value::Null)),
        }
    }

    /// Parse one inbound line.
    ///
    /// Returns `None` for anything that is not a JSON object: blank lines,
    /// log output, truncated records. Such lines are never errors.
    #[must_use]
    pub fn parse_line(line: &str) -> Option<Self> {
        if !looks_like_record(line) {
            return None;
        }

        let mut fields: Map<String, Value> = match serde_json::from_str(line.trim()) {
            Ok(fields) => fields,
            Err(err) => {
                trace!(%err, "discarding brace-prefixed line that is not a JSON object");
                return None;
            }
        };

        let method = match fields.remove("method") {
            Some(Value::String(method)) => Some(method),
            _ => None,
        };

        Some(Self {
            id: fields.remove("id").filter(|id| !id.is_null()),
            method,
            params: fields.remove("params"),
            result: fields.remove("result"),
            error: fields.remove("error").filter(|err| !err.is_null()),
        })
    }
}

/// Cheap screen applied before parsing: does the line open a JSON object?
#[must_use]
pub fn looks_like_record(line: &str) -> bool {
    line.trim_start().starts_with('{')
}

/// Human-readable message from an error payload.
///
/// Accepts `{"message": ..}` objects, bare strings, and falls back to the
/// compact JSON of anything else.
fn error_message(err: &Value) -> String {
    match err {
        Value::String(msg) => msg.clone(),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| err.to_string(), str::to_owned),
        other => other.to_string(),
    }
}
