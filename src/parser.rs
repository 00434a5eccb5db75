//! Extraction of tool invocations embedded in agent output.
//!
//! Agents request a tool by writing a marker followed by a JSON object:
//!
//! ```text
//! Let me check the repository first.
//! [TOOL:git_status] {"repo_path": "."}
//! ```
//!
//! Extraction is best-effort over generated text. A marker whose payload is
//! not a JSON object is skipped and scanning continues with the next marker.
//! Results travel back to the agent as `[TOOL_RESULT:<name>] <json>` or
//! `[TOOL_ERROR:<name>] <message>`; neither tag matches the request marker.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

#[allow(clippy::expect_used)] // Constant pattern; covered by unit tests.
static TOOL_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[TOOL:([A-Za-z0-9_.\-/]+)\]").expect("tool marker pattern is valid")
});

/// One tool call requested by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Name of the requested tool.
    pub tool_name: String,
    /// Argument object passed to the tool.
    pub params: Map<String, Value>,
}

/// Extract every well-formed tool invocation from `text`, in order of
/// appearance.
///
/// Markers that appear inside an already-consumed payload (for example in a
/// JSON string value) are not reported separately.
#[must_use]
pub fn parse_tool_invocations(text: &str) -> Vec<ToolInvocation> {
    let mut found = Vec::new();
    let mut consumed_until = 0usize;

    for caps in TOOL_MARKER.captures_iter(text) {
        let (Some(marker), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if marker.start() < consumed_until {
            continue;
        }

        let after = &text[marker.end()..];
        let payload = after.trim_start();
        if !payload.starts_with('{') {
            debug!(tool = name.as_str(), "tool marker without object payload, skipping");
            continue;
        }
        let payload_start = marker.end() + (after.len() - payload.len());

        let mut stream = serde_json::Deserializer::from_str(payload).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(params))) => {
                consumed_until = payload_start + stream.byte_offset();
                found.push(ToolInvocation {
                    tool_name: name.as_str().to_owned(),
                    params,
                });
            }
            Some(Ok(_)) | None => {}
            Some(Err(err)) => {
                debug!(tool = name.as_str(), %err, "unparseable tool payload, skipping");
            }
        }
    }

    found
}

/// Line written back to an agent after a successful tool call.
#[must_use]
pub fn format_tool_result(tool_name: &str, result: &Value) -> String {
    format!("[TOOL_RESULT:{tool_name}] {result}")
}

/// Line written back to an agent after a failed tool call.
#[must_use]
pub fn format_tool_error(tool_name: &str, message: &str) -> String {
    let single_line = message.replace(['\r', '\n'], " ");
    format!("[TOOL_ERROR:{tool_name}] {single_line}")
}
