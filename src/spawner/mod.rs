//! Agent process supervisor.
//!
//! An [`AgentSpawner`] launches any number of independent agent processes,
//! feeds each its instruction over stdin, watches its output for embedded
//! tool invocations, and routes those through a shared [`ToolGateway`].
//! Every instance owns exactly one process; no two instances share a stream.
//!
//! Submodules:
//! - `config`: per-spawn settings and the launch material derived from them.
//! - `instance`: lifecycle status and instance snapshots.
//! - `output`: per-agent event task, tool routing, and the timeout watchdog.

pub mod config;
pub mod instance;
mod output;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::{MemorySink, ToolGateway};
use crate::config::GlobalConfig;
use crate::process::{EnvPolicy, ProcessHandle, ProcessSpec};
use crate::{AppError, Result};

pub use config::{AgentMode, CommitStrategy, SpawnConfig};
pub use instance::{AgentInfo, AgentInstance, AgentStatus};

/// Capacity of the spawner event channel.
const EVENT_CAPACITY: usize = 128;

/// Time an agent gets to exit after being killed.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// How agent processes are launched and where history is recorded.
#[derive(Debug, Clone)]
pub struct SpawnerSettings {
    /// Agent executable.
    pub program: String,
    /// Arguments placed before the per-spawn flags.
    pub base_args: Vec<String>,
    /// Working directory for agents.
    pub working_dir: Option<PathBuf>,
    /// Tools granted when a spawn request names none.
    pub default_tools: Vec<String>,
    /// Parent-environment inheritance for agents.
    pub env_policy: EnvPolicy,
    /// Owner id for memory records.
    pub owner_id: String,
}

impl SpawnerSettings {
    /// Settings for `program` with no base arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            working_dir: None,
            default_tools: Vec::new(),
            env_policy: EnvPolicy::Inherit,
            owner_id: "agent-switchboard".into(),
        }
    }

    /// Derive the settings from the global configuration.
    #[must_use]
    pub fn from_global(config: &GlobalConfig) -> Self {
        Self {
            program: config.agent.command.clone(),
            base_args: config.agent.args.clone(),
            working_dir: config.agent.working_dir.clone(),
            default_tools: config.agent.default_tools.clone(),
            env_policy: config.agent.env_policy(),
            owner_id: config.memory.owner_id.clone(),
        }
    }
}

/// Lifecycle notifications published by the spawner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnerEvent {
    /// An agent received its instruction and is working.
    Spawned(AgentInfo),
    /// An agent changed status.
    StatusChanged {
        /// Instance id.
        id: String,
        /// Previous status.
        from: AgentStatus,
        /// New status.
        to: AgentStatus,
    },
    /// A tool invocation requested by an agent finished.
    ToolExecuted {
        /// Instance id.
        id: String,
        /// Tool that ran.
        tool: String,
        /// Whether the tool returned a result.
        success: bool,
    },
    /// An agent was removed by `kill` or `kill_all`.
    Killed {
        /// Instance id.
        id: String,
    },
}

type Registry = Arc<Mutex<HashMap<String, Tracked>>>;

struct Tracked {
    seq: u64,
    instance: AgentInstance,
}

/// State shared between the spawner and its per-agent tasks.
pub(crate) struct SpawnerContext {
    settings: SpawnerSettings,
    registry: Registry,
    gateway: Arc<dyn ToolGateway>,
    memory: Arc<dyn MemorySink>,
    events: broadcast::Sender<SpawnerEvent>,
    next_seq: AtomicU64,
}

impl SpawnerContext {
    fn publish(&self, event: SpawnerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn count_tool_calls(&self, id: &str, count: usize) {
        let mut registry = self.registry.lock().await;
        if let Some(tracked) = registry.get_mut(id) {
            tracked.instance.tool_calls += u64::try_from(count).unwrap_or(u64::MAX);
        }
    }

    /// Record the process exit and move the instance to its terminal status.
    async fn finish(&self, id: &str, next: AgentStatus, exit_code: Option<i32>) {
        let change = {
            let mut registry = self.registry.lock().await;
            let Some(tracked) = registry.get_mut(id) else {
                debug!(agent_id = id, "exit for untracked agent ignored");
                return;
            };
            let instance = &mut tracked.instance;
            instance.exit_code = exit_code;
            let from = instance.status;
            instance.transition(next).then_some((from, next))
        };

        match change {
            Some((from, to)) => {
                info!(agent_id = id, ?from, ?to, "agent status changed");
                self.publish(SpawnerEvent::StatusChanged {
                    id: id.to_owned(),
                    from,
                    to,
                });
            }
            None => debug!(agent_id = id, ?next, "status transition rejected"),
        }
    }

    async fn terminate(&self, id: &str) {
        if let Some(tracked) = self.registry.lock().await.get(id) {
            tracked.instance.process.terminate();
        }
    }
}

/// Launches and supervises agent processes.
///
/// Cloning is cheap; clones share one registry.
#[derive(Clone)]
pub struct AgentSpawner {
    ctx: Arc<SpawnerContext>,
}

impl std::fmt::Debug for AgentSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSpawner")
            .field("program", &self.ctx.settings.program)
            .finish_non_exhaustive()
    }
}

impl AgentSpawner {
    /// Create a spawner routing tool calls through `gateway` and recording
    /// history in `memory`.
    #[must_use]
    pub fn new(
        settings: SpawnerSettings,
        gateway: Arc<dyn ToolGateway>,
        memory: Arc<dyn MemorySink>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            ctx: Arc::new(SpawnerContext {
                settings,
                registry: Arc::new(Mutex::new(HashMap::new())),
                gateway,
                memory,
                events,
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Launch an agent, deliver its instruction, and start supervising it.
    ///
    /// When `config.tools` is empty the configured default tools are granted.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Launch`] if the process cannot be started or the
    /// instruction cannot be written to it. In the latter case the process
    /// is terminated and nothing is registered.
    pub async fn spawn(&self, mut config: SpawnConfig) -> Result<AgentInfo> {
        let ctx = &self.ctx;
        let settings = &ctx.settings;

        if config.tools.is_empty() {
            config.tools.clone_from(&settings.default_tools);
        }
        let config = Arc::new(config);
        let id = Uuid::new_v4().to_string();

        let label = format!("agent:{}", config.name);
        let mut spec = ProcessSpec::new(label, settings.program.clone())
            .args(settings.base_args.iter().cloned())
            .args(config.build_args());
        spec.env = config.build_env(&id);
        spec.env_policy = settings.env_policy.clone();
        spec.working_dir.clone_from(&settings.working_dir);

        let (process, events) = ProcessHandle::spawn(&spec).inspect_err(|err| {
            warn!(agent_name = config.name, %err, "agent launch failed");
        })?;
        let writer = process.writer();
        let done = CancellationToken::new();

        let seq = ctx.next_seq.fetch_add(1, Ordering::Relaxed);
        ctx.registry.lock().await.insert(
            id.clone(),
            Tracked {
                seq,
                instance: AgentInstance {
                    id: id.clone(),
                    config: Arc::clone(&config),
                    status: AgentStatus::Idle,
                    spawned_at: Utc::now(),
                    exit_code: None,
                    tool_calls: 0,
                    process,
                    done: done.clone(),
                },
            },
        );
        debug!(agent_id = id, agent_name = config.name, "agent registered");

        if let Err(err) = writer.write_line(&config.enhanced_instruction()).await {
            warn!(agent_id = id, %err, "failed to deliver instruction, terminating agent");
            if let Some(tracked) = ctx.registry.lock().await.remove(&id) {
                tracked.instance.process.terminate();
            }
            return Err(AppError::Launch(format!(
                "could not deliver instruction to agent '{}': {err}",
                config.name
            )));
        }

        let info = {
            let mut registry = ctx.registry.lock().await;
            let Some(tracked) = registry.get_mut(&id) else {
                return Err(AppError::Launch(format!(
                    "agent '{}' was removed during startup",
                    config.name
                )));
            };
            tracked.instance.transition(AgentStatus::Working);
            tracked.instance.info()
        };
        info!(agent_id = id, agent_name = config.name, pid = info.pid, "agent working");

        ctx.publish(SpawnerEvent::StatusChanged {
            id: id.clone(),
            from: AgentStatus::Idle,
            to: AgentStatus::Working,
        });
        ctx.publish(SpawnerEvent::Spawned(info.clone()));

        let timed_out = CancellationToken::new();
        if let Some(limit) = config.timeout() {
            tokio::spawn(output::watch_deadline(
                Arc::clone(ctx),
                id.clone(),
                limit,
                done.clone(),
                timed_out.clone(),
            ));
        }
        tokio::spawn(output::run_agent_events(
            Arc::clone(ctx),
            output::AgentTask {
                id: id.clone(),
                config: Arc::clone(&config),
                writer,
                done,
                timed_out,
            },
            events,
        ));

        // Recorded in the background; `spawn` never waits on the memory sink.
        tokio::spawn(output::persist_spawn_context(Arc::clone(ctx), id, config));

        Ok(info)
    }

    /// Stop tracking agent `id` and terminate its process.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if no such agent is tracked.
    pub async fn kill(&self, id: &str) -> Result<()> {
        let tracked = self
            .ctx
            .registry
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| AppError::NotFound(format!("agent '{id}' is not tracked")))?;

        stop(tracked.instance).await;
        self.ctx.publish(SpawnerEvent::Killed { id: id.to_owned() });
        Ok(())
    }

    /// Stop tracking every agent and terminate all of them concurrently.
    ///
    /// Returns how many agents were removed.
    pub async fn kill_all(&self) -> usize {
        let drained: Vec<Tracked> = {
            let mut registry = self.ctx.registry.lock().await;
            registry.drain().map(|(_, tracked)| tracked).collect()
        };
        let count = drained.len();

        let ids: Vec<String> = drained.iter().map(|t| t.instance.id.clone()).collect();
        join_all(drained.into_iter().map(|tracked| stop(tracked.instance))).await;

        for id in ids {
            self.ctx.publish(SpawnerEvent::Killed { id });
        }
        if count > 0 {
            info!(count, "all agents killed");
        }
        count
    }

    /// Snapshot of every tracked agent, in spawn order.
    pub async fn instances(&self) -> Vec<AgentInfo> {
        let registry = self.ctx.registry.lock().await;
        let mut tracked: Vec<&Tracked> = registry.values().collect();
        tracked.sort_by_key(|t| t.seq);
        tracked.iter().map(|t| t.instance.info()).collect()
    }

    /// Snapshot of agent `id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if no such agent is tracked.
    pub async fn status(&self, id: &str) -> Result<AgentInfo> {
        self.ctx
            .registry
            .lock()
            .await
            .get(id)
            .map(|t| t.instance.info())
            .ok_or_else(|| AppError::NotFound(format!("agent '{id}' is not tracked")))
    }

    /// Wait until agent `id` has exited and its final status is recorded.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if no such agent is tracked, or if it
    /// is killed while waiting.
    pub async fn wait(&self, id: &str) -> Result<AgentInfo> {
        let done = self
            .ctx
            .registry
            .lock()
            .await
            .get(id)
            .map(|t| t.instance.done.clone())
            .ok_or_else(|| AppError::NotFound(format!("agent '{id}' is not tracked")))?;

        done.cancelled().await;
        self.status(id).await
    }

    /// Subscribe to spawner lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SpawnerEvent> {
        self.ctx.events.subscribe()
    }

    /// Search recorded spawn and tool-execution history.
    ///
    /// # Errors
    ///
    /// Returns the memory sink's failure.
    pub async fn search_history(&self, query: &str, limit: usize) -> Result<Value> {
        self.ctx
            .memory
            .search(&self.ctx.settings.owner_id, query, limit)
            .await
    }
}

/// Terminate an untracked instance and wait briefly for it to exit.
async fn stop(instance: AgentInstance) {
    if !instance.process.shutdown(KILL_GRACE).await {
        warn!(agent_id = instance.id, "agent did not exit within grace period");
    }
    instance.done.cancel();
    debug!(agent_id = instance.id, "agent stopped");
}
