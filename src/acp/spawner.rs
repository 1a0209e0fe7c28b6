//! Agent process spawner.
//!
//! Launches the agent with:
//! - `kill_on_drop(true)` so the process never outlives its owner;
//! - the agent's own directory prepended to `PATH`;
//! - optionally the login-shell environment, so toolchains installed via
//!   shell profiles are visible;
//! - stderr drained into the log under target `acp_engine::agent_stderr`,
//!   so the agent never blocks on a full pipe.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, Instrument};

use crate::process::shell_env;
use crate::{AppError, Result};

/// Log target for forwarded agent stderr.
pub const AGENT_STDERR_TARGET: &str = "acp_engine::agent_stderr";

/// How to launch an agent.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Agent executable (name on `PATH` or a path).
    pub command: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory of the agent.
    pub cwd: PathBuf,
    /// Extra variables, applied last.
    pub env: BTreeMap<String, String>,
    /// Import the login-shell environment before launching.
    pub load_login_env: bool,
    /// Deadline for the login-shell import.
    pub login_env_timeout: Duration,
}

impl SpawnConfig {
    /// Minimal config: run `command` in `cwd` with the inherited environment.
    #[must_use]
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
            load_login_env: false,
            login_env_timeout: Duration::from_secs(5),
        }
    }
}

/// A launched agent with its pipes taken out.
#[derive(Debug)]
pub struct AgentProcess {
    /// Child handle (`kill_on_drop`).
    pub child: Child,
    /// Agent stdin: host → agent messages.
    pub stdin: ChildStdin,
    /// Agent stdout: agent → host messages.
    pub stdout: ChildStdout,
    /// Stderr forwarding task.
    pub stderr_task: JoinHandle<()>,
    /// OS process id, if still known.
    pub pid: Option<u32>,
}

/// Launch the agent described by `config`.
///
/// # Errors
///
/// - [`AppError::Io`] if the process cannot be spawned or its pipes captured.
/// - [`AppError::NotFound`] if the executable cannot be located.
pub async fn spawn_agent(config: &SpawnConfig) -> Result<AgentProcess> {
    let span = info_span!("launch", command = %config.command);
    async {
        let mut env: HashMap<String, String> = if config.load_login_env {
            match shell_env::load_login_env(config.login_env_timeout).await {
                Some(env) => env,
                None => std::env::vars().collect(),
            }
        } else {
            std::env::vars().collect()
        };
        env.extend(config.env.clone());

        let executable = locate(&config.command, &config.cwd, env.get("PATH"))?;
        if let Some(dir) = executable.parent() {
            shell_env::prepend_path(&mut env, dir);
        }

        let mut cmd = Command::new(&executable);
        cmd.args(&config.args)
            .env_clear()
            .envs(&env)
            .current_dir(&config.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            AppError::Io(format!("failed to spawn agent {}: {err}", executable.display()))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Io("failed to capture agent stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Io("failed to capture agent stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Io("failed to capture agent stderr".into()))?;

        let pid = child.id();
        info!(?pid, executable = %executable.display(), cwd = %config.cwd.display(), "agent launched");

        Ok(AgentProcess {
            child,
            stdin,
            stdout,
            stderr_task: tokio::spawn(forward_stderr(stderr, pid)),
            pid,
        })
    }
    .instrument(span)
    .await
}

/// Find the agent executable using the environment it will run with.
fn locate(command: &str, cwd: &Path, path_var: Option<&String>) -> Result<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        let full = cwd.join(candidate);
        return if full.exists() {
            Ok(full)
        } else {
            Err(AppError::NotFound(format!("agent executable {}", full.display())))
        };
    }
    which::which_in(command, path_var, cwd)
        .map_err(|err| AppError::NotFound(format!("agent executable {command}: {err}")))
}

async fn forward_stderr(stderr: ChildStderr, pid: Option<u32>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(target: "acp_engine::agent_stderr", ?pid, "{line}"),
            Ok(None) => break,
            Err(err) => {
                debug!(target: "acp_engine::agent_stderr", ?pid, %err, "stderr read failed");
                break;
            }
        }
    }
}
