//! Agent instance model and lifecycle helpers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::process::ProcessHandle;
use crate::spawner::config::SpawnConfig;

/// Lifecycle status for an agent instance.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Process launched, instruction not yet delivered.
    Idle,
    /// Instruction delivered; the agent is running.
    Working,
    /// Process exited with code zero.
    Completed,
    /// Process exited non-zero, by signal, on error, or timed out.
    Failed,
}

impl AgentStatus {
    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Working | Self::Failed)
                | (Self::Working, Self::Completed | Self::Failed)
        )
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One supervised agent.
#[derive(Debug)]
pub struct AgentInstance {
    /// Generated unique id.
    pub id: String,
    /// Spawn-time configuration.
    pub config: Arc<SpawnConfig>,
    /// Current lifecycle status.
    pub status: AgentStatus,
    /// Spawn timestamp.
    pub spawned_at: DateTime<Utc>,
    /// Exit code once the process has exited normally.
    pub exit_code: Option<i32>,
    /// Number of tool invocations dispatched so far.
    pub tool_calls: u64,
    pub(crate) process: ProcessHandle,
    pub(crate) done: CancellationToken,
}

impl AgentInstance {
    /// Apply `next` if the transition is legal; returns whether it was.
    pub fn transition(&mut self, next: AgentStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Read-only snapshot of this instance.
    #[must_use]
    pub fn info(&self) -> AgentInfo {
        AgentInfo {
            id: self.id.clone(),
            name: self.config.name.clone(),
            status: self.status,
            mode: self.config.mode.map(|m| m.as_str().to_owned()),
            spawned_at: self.spawned_at,
            pid: self.process.pid(),
            exit_code: self.exit_code,
            tool_calls: self.tool_calls,
        }
    }
}

/// Snapshot of one agent returned to callers.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AgentInfo {
    /// Instance id.
    pub id: String,
    /// Agent name.
    pub name: String,
    /// Status at snapshot time.
    pub status: AgentStatus,
    /// Mode flag value, if any.
    pub mode: Option<String>,
    /// Spawn timestamp.
    pub spawned_at: DateTime<Utc>,
    /// OS process id.
    pub pid: Option<u32>,
    /// Exit code, once known.
    pub exit_code: Option<i32>,
    /// Tool invocations dispatched so far.
    pub tool_calls: u64,
}
