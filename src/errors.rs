//! Error types shared across the engine.

use std::fmt::{Display, Formatter};

use crate::models::message::RpcError;

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Failure of the transport to the agent process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The agent process is not running (never launched, or already terminated).
    NotRunning,
    /// The agent process exited; `code` is `None` when it was killed by a signal.
    Exited {
        /// Process exit code, if any.
        code: Option<i32>,
    },
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotRunning => write!(f, "process not running"),
            Self::Exited { code: Some(code) } => write!(f, "process failed with code {code}"),
            Self::Exited { code: None } => write!(f, "process terminated by signal"),
        }
    }
}

/// Failure of a terminal operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalError {
    /// No terminal with this id was ever created.
    NotFound(String),
    /// The terminal was released; only cached output may still be read.
    Released(String),
    /// The executable could not be resolved.
    ExecutableNotFound(String),
    /// The command string could not be tokenized.
    Unparsable(String),
    /// The OS refused to spawn the process.
    Spawn(String),
}

impl Display for TerminalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "terminal not found: {id}"),
            Self::Released(id) => write!(f, "terminal released: {id}"),
            Self::ExecutableNotFound(name) => write!(f, "executable not found: {name}"),
            Self::Unparsable(reason) => write!(f, "unparsable command: {reason}"),
            Self::Spawn(reason) => write!(f, "spawn failed: {reason}"),
        }
    }
}

/// Application error enumeration covering all engine failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// The agent transport died or was closed.
    Transport(TransportError),
    /// Malformed JSON, oversize line, or a payload of the wrong shape.
    Protocol(String),
    /// A well-formed JSON-RPC error returned by the agent.
    Agent(RpcError),
    /// A deadline elapsed.
    Timeout(String),
    /// Terminal lifecycle failure.
    Terminal(TerminalError),
    /// An inbound capability request arrived with no delegate registered.
    DelegateNotConfigured(String),
    /// A one-shot command exited unsuccessfully.
    CommandFailed {
        /// Exit code, `None` when terminated by a signal.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// Requested entity does not exist.
    NotFound(String),
    /// The operation was refused by the user or policy.
    PermissionDenied(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Transport(err) => write!(f, "transport: {err}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Agent(err) => write!(f, "agent: {} ({})", err.provider_message(), err.code),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Terminal(err) => write!(f, "terminal: {err}"),
            Self::DelegateNotConfigured(method) => {
                write!(f, "delegate not configured: {method}")
            }
            Self::CommandFailed { code, stderr } => {
                let stderr = stderr.trim();
                match code {
                    Some(code) => write!(f, "command failed with code {code}: {stderr}"),
                    None => write!(f, "command terminated by signal: {stderr}"),
                }
            }
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::PermissionDenied(msg) => write!(f, "permission denied: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<TransportError> for AppError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

impl From<TerminalError> for AppError {
    fn from(err: TerminalError) -> Self {
        Self::Terminal(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}
