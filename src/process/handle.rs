//! Supervised child process with piped stdio.
//!
//! [`ProcessHandle::spawn`] launches an executable and hands back the handle
//! plus a receiver of [`ProcessEvent`]s. Three background tasks run per
//! process:
//! - a stdout pump and a stderr pump forwarding raw chunks, and
//! - a supervisor that owns the [`Child`], waits for exit (or for an explicit
//!   [`ProcessHandle::terminate`]) and emits exactly one
//!   [`ProcessEvent::Closed`] once both pumps have drained.
//!
//! There is no restart: an exited process stays exited.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{BytesCodec, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Capacity of the per-process event channel.
const EVENT_BUFFER: usize = 256;

/// Time a process gets to exit after `SIGTERM` before it is killed.
const TERM_GRACE: Duration = Duration::from_secs(3);

/// Time the supervisor waits for the output pumps after exit.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Environment variables an isolated child inherits from this process.
///
/// Everything else is stripped with `env_clear()` so credentials meant for the
/// tool server never reach agent processes.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "RUST_LOG",
    "LANG",
    "TERM",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// How the child's environment is derived from ours.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EnvPolicy {
    /// Inherit the full parent environment.
    #[default]
    Inherit,
    /// Start from an empty environment and copy only [`ALLOWED_ENV_VARS`]
    /// plus the listed extra names.
    Isolated(Vec<String>),
}

/// Everything needed to launch one process.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Short label used in log fields.
    pub label: String,
    /// Executable name or path.
    pub program: String,
    /// Command-line arguments.
    pub args: Vec<String>,
    /// Variables added on top of the inherited environment.
    pub env: Vec<(String, String)>,
    /// Inheritance policy for the parent environment.
    pub env_policy: EnvPolicy,
    /// Working directory; defaults to the current one.
    pub working_dir: Option<PathBuf>,
}

impl ProcessSpec {
    /// Spec for `program` with no arguments and an inherited environment.
    #[must_use]
    pub fn new(label: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            env_policy: EnvPolicy::Inherit,
            working_dir: None,
        }
    }

    /// Append arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add one environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if let EnvPolicy::Isolated(extra) = &self.env_policy {
            cmd.env_clear();
            let names = ALLOWED_ENV_VARS
                .iter()
                .copied()
                .chain(extra.iter().map(String::as_str));
            for key in names {
                if let Ok(val) = std::env::var(key) {
                    cmd.env(key, val);
                }
            }
        }

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Output and lifecycle notifications from one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// Raw chunk read from stdout; not aligned to line boundaries.
    Stdout(Bytes),
    /// Raw chunk read from stderr.
    Stderr(Bytes),
    /// Waiting on the process failed; a `Closed` event follows.
    Error(String),
    /// The process is gone. Emitted exactly once, always last.
    Closed {
        /// Exit code, or `None` when terminated by a signal or on wait error.
        exit_code: Option<i32>,
        /// Whether the exit followed a call to [`ProcessHandle::terminate`].
        requested: bool,
    },
}

/// Cloneable write half of a process's stdin.
#[derive(Debug, Clone)]
pub struct StdinWriter {
    label: String,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
}

impl StdinWriter {
    /// Write `line` followed by `\n` and flush.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotConnected`] once the process has exited.
    /// - [`AppError::Io`] if the pipe write fails.
    pub async fn write_line(&self, line: &str) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Err(AppError::NotConnected(format!(
                "stdin of '{}' is closed",
                self.label
            )));
        };

        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');

        let written = async {
            stdin.write_all(&bytes).await?;
            stdin.flush().await
        }
        .await;

        written.map_err(|e| {
            warn!(label = self.label, error = %e, "write to stdin failed");
            AppError::Io(format!("write failed: {e}"))
        })
    }
}

/// Handle to one supervised child process.
///
/// Dropping the handle terminates the process.
#[derive(Debug)]
pub struct ProcessHandle {
    label: String,
    pid: Option<u32>,
    writer: StdinWriter,
    cancel: CancellationToken,
    closed: CancellationToken,
}

impl ProcessHandle {
    /// Launch the process described by `spec`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Launch`] if the OS refuses to start the process or
    /// any of its stdio pipes cannot be captured.
    pub fn spawn(spec: &ProcessSpec) -> Result<(Self, mpsc::Receiver<ProcessEvent>)> {
        let mut child = spec.command().spawn().map_err(|err| {
            AppError::Launch(format!("failed to spawn '{}': {err}", spec.program))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            AppError::Launch(format!("failed to capture stdin of '{}'", spec.label))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            AppError::Launch(format!("failed to capture stdout of '{}'", spec.label))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            AppError::Launch(format!("failed to capture stderr of '{}'", spec.label))
        })?;

        let pid = child.id();
        info!(label = spec.label, program = spec.program, pid, "process spawned");

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let stdout_task = tokio::spawn(pump(
            spec.label.clone(),
            stdout,
            event_tx.clone(),
            ProcessEvent::Stdout,
        ));
        let stderr_task = tokio::spawn(pump(
            spec.label.clone(),
            stderr,
            event_tx.clone(),
            ProcessEvent::Stderr,
        ));

        let writer = StdinWriter {
            label: spec.label.clone(),
            stdin: Arc::new(Mutex::new(Some(stdin))),
        };
        let cancel = CancellationToken::new();
        let closed = CancellationToken::new();

        tokio::spawn(supervise(Supervision {
            label: spec.label.clone(),
            child,
            pumps: [stdout_task, stderr_task],
            event_tx,
            cancel: cancel.clone(),
            closed: closed.clone(),
            stdin: Arc::clone(&writer.stdin),
        }));

        Ok((
            Self {
                label: spec.label.clone(),
                pid,
                writer,
                cancel,
                closed,
            },
            event_rx,
        ))
    }

    /// Label given at spawn time.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// OS process id, if the platform reported one.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process has not yet been observed to exit.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// A cloneable writer for the process's stdin.
    #[must_use]
    pub fn writer(&self) -> StdinWriter {
        self.writer.clone()
    }

    /// Write one line to the process's stdin.
    ///
    /// # Errors
    ///
    /// See [`StdinWriter::write_line`].
    pub async fn write_line(&self, line: &str) -> Result<()> {
        self.writer.write_line(line).await
    }

    /// Request termination. Idempotent; returns immediately.
    pub fn terminate(&self) {
        if !self.cancel.is_cancelled() {
            debug!(label = self.label, "termination requested");
        }
        self.cancel.cancel();
    }

    /// Wait until the process has exited and its `Closed` event was emitted.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Terminate and wait up to `grace` for the exit to be observed.
    ///
    /// Returns `true` if the process is gone when this returns.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.terminate();
        tokio::time::timeout(grace, self.closed()).await.is_ok()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Forward raw chunks from `stream` as events.
///
/// Keeps draining after the receiver is gone so the child never blocks on a
/// full pipe.
async fn pump<R>(
    label: String,
    stream: R,
    event_tx: mpsc::Sender<ProcessEvent>,
    wrap: fn(Bytes) -> ProcessEvent,
) where
    R: AsyncRead + Unpin,
{
    let mut framed = FramedRead::new(stream, BytesCodec::new());
    let mut delivering = true;

    while let Some(item) = framed.next().await {
        match item {
            Ok(chunk) => {
                if delivering && event_tx.send(wrap(chunk.freeze())).await.is_err() {
                    debug!(label, "event receiver dropped; discarding further output");
                    delivering = false;
                }
            }
            Err(err) => {
                warn!(label, %err, "output pump read error, stopping");
                break;
            }
        }
    }
}

struct Supervision {
    label: String,
    child: Child,
    pumps: [JoinHandle<()>; 2],
    event_tx: mpsc::Sender<ProcessEvent>,
    cancel: CancellationToken,
    closed: CancellationToken,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
}

async fn supervise(sup: Supervision) {
    let Supervision {
        label,
        mut child,
        pumps,
        event_tx,
        cancel,
        closed,
        stdin,
    } = sup;

    let (status, requested) = tokio::select! {
        status = child.wait() => (status, false),
        () = cancel.cancelled() => (terminate_child(&label, &mut child).await, true),
    };

    stdin.lock().await.take();

    let [stdout_task, stderr_task] = pumps;
    let drained = tokio::time::timeout(DRAIN_GRACE, async {
        let _ = tokio::join!(stdout_task, stderr_task);
    })
    .await;
    if drained.is_err() {
        debug!(label, "output pumps still open after exit; closing anyway");
    }

    let exit_code = match status {
        Ok(status) => {
            info!(label, reason = %describe_exit(status), requested, "process exited");
            status.code()
        }
        Err(err) => {
            warn!(label, %err, "error waiting for child process");
            let _ = event_tx
                .send(ProcessEvent::Error(format!("wait error: {err}")))
                .await;
            None
        }
    };

    let _ = event_tx
        .send(ProcessEvent::Closed {
            exit_code,
            requested,
        })
        .await;
    closed.cancel();
}

/// Ask the child to stop, escalating to a hard kill after [`TERM_GRACE`].
async fn terminate_child(label: &str, child: &mut Child) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|p| i32::try_from(p).ok()) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if kill(Pid::from_raw(pid), Signal::SIGTERM).is_ok() {
            if let Ok(status) = tokio::time::timeout(TERM_GRACE, child.wait()).await {
                return status;
            }
            warn!(label, "process ignored SIGTERM, killing");
        }
    }

    if let Err(err) = child.kill().await {
        warn!(label, %err, "failed to kill process");
    }
    child.wait().await
}

fn describe_exit(status: ExitStatus) -> String {
    status.code().map_or_else(
        || "terminated by signal".to_owned(),
        |c| format!("exited with code {c}"),
    )
}
