//! Per-agent event handling: output parsing, tool routing, exit tracking.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::parser::{
    format_tool_error, format_tool_result, parse_tool_invocations, ToolInvocation,
};
use crate::process::{ProcessEvent, StdinWriter};
use crate::spawner::config::SpawnConfig;
use crate::spawner::instance::AgentStatus;
use crate::spawner::{SpawnerContext, SpawnerEvent};

/// Identity of the agent an event task serves.
pub(crate) struct AgentTask {
    pub id: String,
    pub config: Arc<SpawnConfig>,
    pub writer: StdinWriter,
    pub done: CancellationToken,
    /// Cancelled by the watchdog once the agent has overrun its timeout.
    pub timed_out: CancellationToken,
}

/// Consume one agent's process events until it closes.
///
/// Tool invocations found in a stdout chunk are dispatched on their own task
/// so a slow tool never stalls output handling for the agent.
pub(crate) async fn run_agent_events(
    ctx: Arc<SpawnerContext>,
    task: AgentTask,
    mut events: mpsc::Receiver<ProcessEvent>,
) {
    let task = Arc::new(task);

    while let Some(event) = events.recv().await {
        match event {
            ProcessEvent::Stdout(chunk) => {
                let text = String::from_utf8_lossy(&chunk);
                debug!(agent_id = task.id, bytes = chunk.len(), "agent output");

                let invocations = parse_tool_invocations(&text);
                if invocations.is_empty() {
                    continue;
                }
                ctx.count_tool_calls(&task.id, invocations.len()).await;
                tokio::spawn(dispatch_invocations(
                    Arc::clone(&ctx),
                    Arc::clone(&task),
                    invocations,
                ));
            }
            ProcessEvent::Stderr(chunk) => {
                warn!(
                    agent_id = task.id,
                    stderr = %String::from_utf8_lossy(&chunk).trim_end(),
                    "agent stderr"
                );
            }
            ProcessEvent::Error(message) => {
                warn!(agent_id = task.id, error = message, "agent process error");
            }
            ProcessEvent::Closed {
                exit_code,
                requested,
            } => {
                let timed_out = task.timed_out.is_cancelled();
                let next = if exit_code == Some(0) && !timed_out {
                    AgentStatus::Completed
                } else {
                    AgentStatus::Failed
                };
                info!(
                    agent_id = task.id,
                    ?exit_code,
                    requested,
                    timed_out,
                    "agent process closed"
                );
                ctx.finish(&task.id, next, exit_code).await;
                break;
            }
        }
    }

    task.done.cancel();
}

/// Run `invocations` in order, writing each result or error back to the
/// agent.
async fn dispatch_invocations(
    ctx: Arc<SpawnerContext>,
    task: Arc<AgentTask>,
    invocations: Vec<ToolInvocation>,
) {
    for invocation in invocations {
        let ToolInvocation { tool_name, params } = invocation;
        let params = Value::Object(params);
        debug!(agent_id = task.id, tool = tool_name, "dispatching tool invocation");

        let started = Instant::now();
        let outcome = ctx.gateway.call_tool(&tool_name, params.clone()).await;
        let elapsed = started.elapsed();

        let (reply, success) = match &outcome {
            Ok(result) => (format_tool_result(&tool_name, result), true),
            Err(err) => {
                warn!(agent_id = task.id, tool = tool_name, %err, "tool invocation failed");
                (format_tool_error(&tool_name, &err.to_string()), false)
            }
        };

        let delivered = match task.writer.write_line(&reply).await {
            Ok(()) => true,
            Err(err) => {
                warn!(agent_id = task.id, tool = tool_name, %err, "could not deliver tool reply");
                false
            }
        };

        if let Ok(result) = &outcome {
            persist_execution(&ctx, &task, &tool_name, &params, result, elapsed).await;
        }

        ctx.publish(SpawnerEvent::ToolExecuted {
            id: task.id.clone(),
            tool: tool_name,
            success,
        });

        // The agent's stdin is gone; later invocations could not be answered.
        if !delivered {
            break;
        }
    }
}

async fn persist_execution(
    ctx: &SpawnerContext,
    task: &AgentTask,
    tool: &str,
    params: &Value,
    result: &Value,
    elapsed: Duration,
) {
    let content = format!("Agent '{}' executed tool '{tool}'", task.config.name);
    let metadata = json!({
        "type": "tool_execution",
        "agent_id": task.id,
        "agent_name": task.config.name,
        "tool": tool,
        "params": params,
        "result": result,
        "duration_ms": u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        "timestamp": Utc::now().to_rfc3339(),
    });

    if let Err(err) = ctx
        .memory
        .add(&ctx.settings.owner_id, &content, metadata)
        .await
    {
        warn!(agent_id = task.id, tool, %err, "failed to persist tool execution");
    }
}

/// Record the spawn in the memory sink. Failures are logged only.
pub(crate) async fn persist_spawn_context(
    ctx: Arc<SpawnerContext>,
    id: String,
    config: Arc<SpawnConfig>,
) {
    let content = format!("Spawned agent '{}': {}", config.name, config.instruction);
    let metadata = json!({
        "type": "spawn_context",
        "agent_id": id,
        "agent_name": config.name,
        "mode": config.mode,
        "tools": config.tools,
        "timestamp": Utc::now().to_rfc3339(),
    });

    if let Err(err) = ctx
        .memory
        .add(&ctx.settings.owner_id, &content, metadata)
        .await
    {
        warn!(agent_id = id, %err, "failed to persist spawn context");
    }
}

/// Terminate the agent if it is still running after `limit`.
///
/// `timed_out` is cancelled before the process is signalled, so the event
/// task records `failed` however the agent exits.
pub(crate) async fn watch_deadline(
    ctx: Arc<SpawnerContext>,
    id: String,
    limit: Duration,
    done: CancellationToken,
    timed_out: CancellationToken,
) {
    tokio::select! {
        () = done.cancelled() => {}
        () = tokio::time::sleep(limit) => {
            warn!(agent_id = id, ?limit, "agent exceeded its timeout, terminating");
            timed_out.cancel();
            ctx.terminate(&id).await;
        }
    }
}
