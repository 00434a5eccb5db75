#![forbid(unsafe_code)]

//! `agent-switchboard`: command-line front end for the orchestration core.
//!
//! Loads configuration, connects to the tool server, and either calls one
//! tool, lists the server's tools, or spawns and supervises one agent until
//! it finishes or a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_switchboard::bridge::{
    BridgeConfig, MemorySink, MessageBridge, Notification, ToolGateway,
};
use agent_switchboard::spawner::{
    AgentMode, AgentSpawner, AgentStatus, CommitStrategy, SpawnConfig, SpawnerSettings,
};
use agent_switchboard::usage::UsageTracker;
use agent_switchboard::{AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-switchboard", about = "Tool-server bridge and agent supervisor", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Call one tool and print its result as JSON.
    Call {
        /// Tool name.
        tool: String,
        /// Arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        params: String,
    },
    /// List the tools the server advertises.
    Tools,
    /// Spawn one agent and supervise it until it exits.
    Spawn {
        /// Agent name.
        #[arg(long)]
        name: String,
        /// Task instruction.
        #[arg(long)]
        instruction: String,
        /// Working style.
        #[arg(long, value_enum)]
        mode: Option<AgentMode>,
        /// Tool the agent may use (repeatable).
        #[arg(long = "tool")]
        tools: Vec<String>,
        /// Research before acting.
        #[arg(long)]
        research: bool,
        /// Allow parallel sub-tasks.
        #[arg(long)]
        parallel: bool,
        /// Minimum coverage percentage.
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        coverage: Option<u8>,
        /// Commit behaviour.
        #[arg(long, value_enum)]
        commit: Option<CommitStrategy>,
        /// Wall-clock limit in seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    debug!("agent-switchboard bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    config.load_credentials().await?;
    info!("configuration loaded");

    // ── Connect the tool server ─────────────────────────
    let usage = Arc::new(UsageTracker::new());
    let bridge = Arc::new(
        MessageBridge::new(BridgeConfig::from_global(&config)).with_usage(Arc::clone(&usage)),
    );
    bridge.connect().await?;

    let outcome = match args.command {
        Command::Call { tool, params } => call(&bridge, &tool, &params).await,
        Command::Tools => bridge.list_tools().await.and_then(|tools| print_json(&tools)),
        Command::Spawn {
            name,
            instruction,
            mode,
            tools,
            research,
            parallel,
            coverage,
            commit,
            timeout,
        } => {
            let spawn_config = SpawnConfig {
                name,
                instruction,
                mode,
                research,
                parallel,
                coverage_threshold: coverage,
                commit_strategy: commit,
                tools,
                timeout_seconds: timeout,
            };
            supervise(&config, &bridge, spawn_config).await
        }
    };

    bridge.disconnect().await;
    for (tool, counters) in usage.snapshot() {
        debug!(
            tool,
            calls = counters.calls,
            failures = counters.failures,
            mean = ?counters.mean_duration(),
            "tool usage"
        );
    }

    outcome
}

async fn call(bridge: &MessageBridge, tool: &str, params: &str) -> Result<()> {
    let params: Value = serde_json::from_str(params)
        .map_err(|err| AppError::Config(format!("--params is not valid JSON: {err}")))?;
    if !params.is_object() {
        return Err(AppError::Config("--params must be a JSON object".into()));
    }
    let result = bridge.call_tool(tool, params).await?;
    print_json(&result)
}

async fn supervise(
    config: &GlobalConfig,
    bridge: &Arc<MessageBridge>,
    spawn_config: SpawnConfig,
) -> Result<()> {
    let spawner = AgentSpawner::new(
        SpawnerSettings::from_global(config),
        Arc::clone(bridge) as Arc<dyn ToolGateway>,
        Arc::clone(bridge) as Arc<dyn MemorySink>,
    );

    let notifications = tokio::spawn(log_notifications(bridge.subscribe_all()));

    let agent = spawner.spawn(spawn_config).await?;
    info!(agent_id = agent.id, name = agent.name, "agent spawned");

    // ── Wait for completion or shutdown signal ──────────
    let finished = tokio::select! {
        result = spawner.wait(&agent.id) => Some(result?),
        () = shutdown_signal() => {
            info!("shutdown signal received");
            None
        }
    };

    let killed = spawner.kill_all().await;
    notifications.abort();

    match finished {
        Some(info) => {
            print_json(&serde_json::to_value(&info)?)?;
            if info.status == AgentStatus::Failed {
                warn!(agent_id = info.id, exit_code = ?info.exit_code, "agent failed");
            }
        }
        None => info!(killed, "agents terminated on shutdown"),
    }
    Ok(())
}

async fn log_notifications(mut rx: tokio::sync::broadcast::Receiver<Notification>) {
    loop {
        match rx.recv().await {
            Ok(Notification::Log { level, message, .. }) => {
                info!(target: "tool_server", level = %level, text = %message, "server log");
            }
            Ok(Notification::ProcessClosed { exit_code }) => {
                error!(?exit_code, "tool server exited unexpectedly");
            }
            Ok(other) => debug!(method = other.method(), "server notification"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "notification log lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries command output.
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
