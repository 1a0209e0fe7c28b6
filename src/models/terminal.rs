//! Terminal identifiers and `terminal/*` payloads.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::protocol::SessionId;

/// Inbound `terminal/create`.
pub const TERMINAL_CREATE: &str = "terminal/create";
/// Inbound `terminal/output`.
pub const TERMINAL_OUTPUT: &str = "terminal/output";
/// Inbound `terminal/wait_for_exit`.
pub const TERMINAL_WAIT_FOR_EXIT: &str = "terminal/wait_for_exit";
/// Inbound `terminal/kill`.
pub const TERMINAL_KILL: &str = "terminal/kill";
/// Inbound `terminal/release`.
pub const TERMINAL_RELEASE: &str = "terminal/release";

/// Opaque terminal identifier; never reused within a process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TerminalId(pub String);

impl TerminalId {
    /// Generate a fresh id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("term-{}", uuid::Uuid::new_v4()))
    }
}

impl Display for TerminalId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TerminalId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Environment variable passed to a terminal command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVariable {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

/// Params of `terminal/create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminalRequest {
    /// Requesting session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Executable, or a whole shell-style command line when `args` is absent.
    pub command: String,
    /// Explicit arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Extra environment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVariable>,
    /// Maximum retained output in bytes; older output is dropped first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_byte_limit: Option<usize>,
}

/// Result of `terminal/create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminalResponse {
    /// The new terminal.
    pub terminal_id: TerminalId,
}

/// Params shared by `terminal/output`, `wait_for_exit`, `kill`, and `release`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalRequest {
    /// Requesting session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Target terminal.
    pub terminal_id: TerminalId,
}

/// How a terminal process ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalExitStatus {
    /// Exit code, absent when killed by a signal.
    pub exit_code: Option<i32>,
    /// Signal name such as `SIGKILL`, absent on normal exit.
    pub signal: Option<String>,
}

impl TerminalExitStatus {
    /// Convert an OS exit status.
    #[must_use]
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        Self {
            exit_code: status.code(),
            signal: signal_name(status),
        }
    }
}

#[cfg(unix)]
fn signal_name(status: std::process::ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;

    status.signal().map(|raw| {
        nix::sys::signal::Signal::try_from(raw)
            .map_or_else(|_| format!("SIG{raw}"), |sig| sig.as_str().to_owned())
    })
}

#[cfg(not(unix))]
fn signal_name(_status: std::process::ExitStatus) -> Option<String> {
    None
}

/// Result of `terminal/output`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalOutputResponse {
    /// Output captured so far (stdout and stderr interleaved in arrival order).
    pub output: String,
    /// Whether older output was dropped to honor the byte limit.
    pub truncated: bool,
    /// Present once the process has exited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<TerminalExitStatus>,
}
