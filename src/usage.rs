//! Per-tool call accounting.
//!
//! A [`UsageTracker`] is constructed by the caller and handed to each
//! [`MessageBridge`](crate::bridge::MessageBridge) that should report into
//! it, so independent bridges (and tests) never share counters by accident.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters for one tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ToolUsage {
    /// Completed calls, successful or not.
    pub calls: u64,
    /// Calls that ended in an error (remote error, timeout, disconnect).
    pub failures: u64,
    /// Sum of call durations in milliseconds.
    pub total_millis: u64,
    /// When the most recent call finished.
    pub last_called: Option<DateTime<Utc>>,
}

impl ToolUsage {
    /// Mean call duration, zero when no calls were made.
    #[must_use]
    pub fn mean_duration(&self) -> Duration {
        if self.calls == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.total_millis / self.calls)
    }
}

/// Thread-safe usage counters keyed by tool name.
#[derive(Debug, Default)]
pub struct UsageTracker {
    tools: Mutex<HashMap<String, ToolUsage>>,
}

impl UsageTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished call.
    pub fn record(&self, tool: &str, success: bool, elapsed: Duration) {
        let mut tools = self.tools.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = tools.entry(tool.to_owned()).or_default();
        entry.calls += 1;
        if !success {
            entry.failures += 1;
        }
        entry.total_millis = entry
            .total_millis
            .saturating_add(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        entry.last_called = Some(Utc::now());
    }

    /// Counters for `tool`, if it was ever called.
    #[must_use]
    pub fn get(&self, tool: &str) -> Option<ToolUsage> {
        let tools = self.tools.lock().unwrap_or_else(PoisonError::into_inner);
        tools.get(tool).cloned()
    }

    /// Snapshot of every tool's counters, ordered by name.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, ToolUsage> {
        let tools = self.tools.lock().unwrap_or_else(PoisonError::into_inner);
        tools.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Total calls across all tools.
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        let tools = self.tools.lock().unwrap_or_else(PoisonError::into_inner);
        tools.values().map(|usage| usage.calls).sum()
    }

    /// Clear all counters.
    pub fn reset(&self) {
        self.tools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
