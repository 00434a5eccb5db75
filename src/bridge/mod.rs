//! Request/response bridge to a tool-server process.
//!
//! A [`MessageBridge`] owns one tool-server process and is shared (behind an
//! `Arc`) as the single gateway to its tools. Calls are correlated purely by
//! request id, so any number of callers may have calls in flight and
//! responses may arrive in any order.
//!
//! Submodules:
//! - `message`: wire record and the inbound line screen.
//! - `pending`: outstanding calls keyed by id.
//! - `dispatch`: inbound line routing and the per-connection dispatcher task.
//! - `notifications`: typed pub/sub for unsolicited server messages.
//! - `tools`: tool catalog and typed wrappers.
//! - `gateway`: [`ToolGateway`] / [`MemorySink`] seams used by the spawner.

pub mod dispatch;
pub mod gateway;
pub mod message;
pub mod notifications;
pub mod pending;
pub mod tools;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::process::{ProcessHandle, ProcessSpec, StdinWriter};
use crate::usage::UsageTracker;
use crate::{AppError, Result};

pub use dispatch::{InboundRouter, RouteOutcome};
pub use gateway::{MemorySink, ToolGateway};
pub use message::Message;
pub use notifications::{Notification, NotificationHub};
pub use pending::PendingRequests;

/// Default wait after launch before the process is checked for liveness.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(1000);

/// Default deadline for a single tool call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for the tool server to exit on disconnect.
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

/// Launch and timing parameters for a bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// How to launch the tool server.
    pub spec: ProcessSpec,
    /// Wait after launch before confirming the process is alive.
    pub settle: Duration,
    /// Deadline applied to every call.
    pub call_timeout: Duration,
}

impl BridgeConfig {
    /// Config for `spec` with default settle period and call timeout.
    #[must_use]
    pub fn new(spec: ProcessSpec) -> Self {
        Self {
            spec,
            settle: DEFAULT_SETTLE,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Derive the bridge config from the global configuration, injecting
    /// credentials into the tool server's environment.
    #[must_use]
    pub fn from_global(config: &GlobalConfig) -> Self {
        let server = &config.tool_server;
        let mut spec =
            ProcessSpec::new("tool-server", server.command.clone()).args(server.args.clone());
        spec.working_dir.clone_from(&server.working_dir);
        spec.env = server
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        spec.env.extend(config.credential_env());

        Self {
            spec,
            settle: Duration::from_millis(server.settle_ms),
            call_timeout: Duration::from_secs(server.call_timeout_seconds),
        }
    }
}

struct Connection {
    handle: ProcessHandle,
    dispatcher: JoinHandle<()>,
}

/// Gateway to one tool-server process.
pub struct MessageBridge {
    config: BridgeConfig,
    connection: Mutex<Option<Connection>>,
    next_id: AtomicU64,
    pending: PendingRequests,
    hub: Arc<NotificationHub>,
    usage: Option<Arc<UsageTracker>>,
}

impl std::fmt::Debug for MessageBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBridge")
            .field("program", &self.config.spec.program)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MessageBridge {
    /// Create a disconnected bridge.
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
            next_id: AtomicU64::new(1),
            pending: PendingRequests::new(),
            hub: Arc::new(NotificationHub::new()),
            usage: None,
        }
    }

    /// Record every call outcome in `usage`.
    #[must_use]
    pub fn with_usage(mut self, usage: Arc<UsageTracker>) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Launch the tool server and confirm it survives the settle period.
    ///
    /// A no-op when already connected to a live process.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Launch`] if the process cannot be started or has
    /// exited by the end of the settle period.
    pub async fn connect(&self) -> Result<()> {
        let mut slot = self.connection.lock().await;
        if slot.as_ref().is_some_and(|conn| conn.handle.is_running()) {
            debug!("bridge already connected");
            return Ok(());
        }

        let spec = &self.config.spec;
        let span = info_span!("bridge_connect", program = spec.program);
        let (handle, events) = ProcessHandle::spawn(spec).inspect_err(|err| {
            warn!(parent: &span, %err, "tool server launch failed");
        })?;

        let router = InboundRouter::new(
            spec.label.clone(),
            self.pending.clone(),
            Arc::clone(&self.hub),
        );
        let dispatcher =
            tokio::spawn(dispatch::run_dispatcher(router, events).instrument(span.clone()));

        tokio::time::sleep(self.config.settle).await;

        if !handle.is_running() {
            dispatcher.abort();
            warn!(parent: &span, "tool server exited during startup");
            return Err(AppError::Launch(format!(
                "tool server '{}' exited within {:?} of launch",
                spec.program, self.config.settle
            )));
        }

        info!(parent: &span, pid = handle.pid(), "tool server connected");
        *slot = Some(Connection { handle, dispatcher });
        Ok(())
    }

    /// Whether a live tool-server process is attached.
    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|conn| conn.handle.is_running())
    }

    /// Invoke tool `name` with `params`.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotConnected`] without a live process.
    /// - [`AppError::RemoteTool`] when the server answers with an error.
    /// - [`AppError::Timeout`] when no response arrives within the call
    ///   timeout; a later response for the same id is ignored.
    /// - [`AppError::Disconnected`] / [`AppError::ProcessExited`] when the
    ///   process goes away while the call is outstanding.
    pub async fn call_tool(&self, name: &str, params: Value) -> Result<Value> {
        self.request(name, |id| Message::tool_call(id, name, params))
            .await
    }

    /// List the tools the server advertises.
    ///
    /// # Errors
    ///
    /// Same as [`Self::call_tool`].
    pub async fn list_tools(&self) -> Result<Value> {
        self.request(message::TOOLS_LIST, |id| {
            Message::request(id, message::TOOLS_LIST, json!({}))
        })
        .await
    }

    /// Issue one correlated request built by `build` from the allocated id;
    /// `tool` labels errors and usage.
    async fn request(&self, tool: &str, build: impl FnOnce(u64) -> Message) -> Result<Value> {
        let writer = self.live_writer().await?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = build(id);
        let line = message.to_line()?;

        let rx = self.pending.register(id, tool).await;
        if let Err(err) = writer.write_line(&line).await {
            self.pending.remove(id).await;
            warn!(request_id = id, tool, %err, "failed to send tool call");
            return Err(err);
        }
        debug!(request_id = id, tool, method = ?message.method, "tool call sent");

        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.config.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_closed)) => Err(AppError::Disconnected(format!(
                "response channel for '{tool}' closed"
            ))),
            Err(_elapsed) => {
                self.pending.remove(id).await;
                warn!(
                    request_id = id,
                    tool,
                    timeout = ?self.config.call_timeout,
                    "tool call timed out"
                );
                Err(AppError::Timeout {
                    tool: tool.to_owned(),
                    after: self.config.call_timeout,
                })
            }
        };

        if let Err(err) = &outcome {
            debug!(request_id = id, tool, %err, "tool call failed");
        }
        if let Some(usage) = &self.usage {
            usage.record(tool, outcome.is_ok(), started.elapsed());
        }
        outcome
    }

    async fn live_writer(&self) -> Result<StdinWriter> {
        let slot = self.connection.lock().await;
        slot.as_ref()
            .filter(|conn| conn.handle.is_running())
            .map(|conn| conn.handle.writer())
            .ok_or_else(|| AppError::NotConnected("tool server is not running".into()))
    }

    /// Terminate the tool server and reject every outstanding call with
    /// [`AppError::Disconnected`]. Safe to call when not connected.
    pub async fn disconnect(&self) {
        let conn = self.connection.lock().await.take();

        if let Some(conn) = conn {
            if !conn.handle.shutdown(DISCONNECT_GRACE).await {
                warn!(
                    pid = conn.handle.pid(),
                    "tool server did not exit within grace period"
                );
            }
            if tokio::time::timeout(DISCONNECT_GRACE, conn.dispatcher).await.is_err() {
                debug!("dispatcher still draining after disconnect");
            }
            info!("tool server disconnected");
        }

        let rejected = self
            .pending
            .reject_all(|tool| {
                AppError::Disconnected(format!("bridge disconnected before '{tool}' responded"))
            })
            .await;
        if rejected > 0 {
            warn!(rejected, "rejected outstanding tool calls on disconnect");
        }
    }

    /// Subscribe to unsolicited notifications published under `method`.
    #[must_use]
    pub fn subscribe(&self, method: &str) -> broadcast::Receiver<Notification> {
        self.hub.subscribe(method)
    }

    /// Subscribe to every unsolicited notification.
    #[must_use]
    pub fn subscribe_all(&self) -> broadcast::Receiver<Notification> {
        self.hub.subscribe_all()
    }

    /// Number of calls currently awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.len().await
    }

    /// Configured per-call deadline.
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        self.config.call_timeout
    }
}
