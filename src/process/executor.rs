//! Process command executor.
//!
//! Runs a short-lived command to completion with stdout and stderr drained
//! concurrently, so a chatty child never blocks on a full pipe. A wall-clock
//! deadline force-terminates the child; the caller gets exactly one outcome:
//!
//! - captured stdout on exit code 0,
//! - [`AppError::CommandFailed`] with captured stderr otherwise,
//! - [`AppError::Timeout`] once the child has been killed and reaped.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::{AppError, Result};

/// Default deadline when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to keep draining pipes after the child exits. Grandchildren
/// that inherited the pipes would otherwise hold the readers open; whatever
/// was read by then is kept.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Description of one command invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory; inherits the caller's when `None`.
    pub cwd: Option<PathBuf>,
    /// Extra environment on top of the inherited one.
    pub env: BTreeMap<String, String>,
    /// Hard deadline.
    pub timeout: Duration,
}

impl CommandSpec {
    /// Command with no arguments and the default timeout.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
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

    /// Set the working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add one environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the deadline.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Everything a finished command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Run `spec` and return its stdout, failing on a non-zero exit.
///
/// # Errors
///
/// - [`AppError::Io`] if the process cannot be spawned.
/// - [`AppError::CommandFailed`] on a non-zero exit or signal.
/// - [`AppError::Timeout`] when the deadline elapses; the child is
///   terminated before this returns.
pub async fn run(spec: &CommandSpec) -> Result<String> {
    let output = run_output(spec).await?;
    if output.success() {
        Ok(output.stdout)
    } else {
        Err(AppError::CommandFailed {
            code: output.code,
            stderr: output.stderr,
        })
    }
}

/// Run `spec` and return everything it produced regardless of exit code.
///
/// # Errors
///
/// Returns [`AppError::Io`] on spawn failure and [`AppError::Timeout`] when
/// the deadline elapses.
pub async fn run_output(spec: &CommandSpec) -> Result<CommandOutput> {
    let span = info_span!("exec", program = %spec.program);
    execute(spec).instrument(span).await
}

async fn execute(spec: &CommandSpec) -> Result<CommandOutput> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Io(format!("failed to spawn {}: {err}", spec.program)))?;
    let pid = child.id();
    debug!(?pid, command = spec.display(), "command started");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Io("failed to capture command stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Io("failed to capture command stderr".into()))?;
    let stdout_stop = CancellationToken::new();
    let stderr_stop = CancellationToken::new();
    let stdout_task = tokio::spawn(drain(stdout, stdout_stop.clone()));
    let stderr_task = tokio::spawn(drain(stderr, stderr_stop.clone()));

    let status = tokio::select! {
        status = child.wait() => {
            status.map_err(|err| AppError::Io(format!("failed to wait for {}: {err}", spec.program)))?
        }
        () = tokio::time::sleep(spec.timeout) => {
            warn!(?pid, timeout = ?spec.timeout, "command timed out, killing");
            if let Err(err) = child.kill().await {
                warn!(?pid, %err, "failed to kill timed-out command");
            }
            stdout_task.abort();
            stderr_task.abort();
            return Err(AppError::Timeout(format!(
                "{} did not finish within {:?}",
                spec.display(),
                spec.timeout
            )));
        }
    };

    let stdout = collect(stdout_task, &stdout_stop).await;
    let stderr = collect(stderr_task, &stderr_stop).await;
    debug!(?pid, code = ?status.code(), "command finished");

    Ok(CommandOutput {
        code: status.code(),
        stdout,
        stderr,
    })
}

async fn drain<R: AsyncRead + Unpin>(mut pipe: R, stop: CancellationToken) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8 * 1024];
    loop {
        tokio::select! {
            read = pipe.read(&mut chunk) => match read {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(err) => {
                    debug!(%err, "pipe read ended with error");
                    break;
                }
            },
            () = stop.cancelled() => break,
        }
    }
    buf
}

async fn collect(mut task: JoinHandle<Vec<u8>>, stop: &CancellationToken) -> String {
    let joined = match tokio::time::timeout(PIPE_DRAIN_GRACE, &mut task).await {
        Ok(joined) => joined,
        Err(_elapsed) => {
            debug!("pipe still open after exit, keeping output read so far");
            stop.cancel();
            task.await
        }
    };
    match joined {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) => {
            debug!(%err, "pipe reader failed");
            String::new()
        }
    }
}
