//! Global configuration parsing, validation, and credential loading.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::acp::spawner::SpawnConfig;
use crate::models::protocol::PROTOCOL_VERSION;
use crate::session::AuthCredentials;
use crate::terminal::resolve::DEFAULT_SEARCH_DIRS;
use crate::terminal::manager::DEFAULT_RELEASED_CACHE;
use crate::terminal::TerminalSettings;
use crate::{AppError, Result};

/// Keyring service under which credentials are stored.
pub const KEYRING_SERVICE: &str = "acp-engine";

/// How to launch and talk to the agent.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent executable.
    pub command: String,
    /// Agent arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the agent and its sessions.
    #[serde(default = "default_cwd")]
    pub cwd: PathBuf,
    /// Extra environment for the agent.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Import the login-shell environment before launching.
    #[serde(default = "default_true")]
    pub load_login_env: bool,
    /// Deadline for outbound requests; 0 means no timeout.
    #[serde(default)]
    pub request_timeout_seconds: u64,
    /// Protocol version offered in `initialize`.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u16,
}

/// Terminal defaults.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TerminalConfig {
    /// Output limit applied when the agent specifies none.
    #[serde(default)]
    pub output_byte_limit: Option<usize>,
    /// Directories searched for bare executable names before `PATH`.
    #[serde(default = "default_search_dirs")]
    pub search_dirs: Vec<PathBuf>,
    /// Released terminals whose final output stays readable.
    #[serde(default = "default_released_cache")]
    pub released_cache: usize,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            output_byte_limit: None,
            search_dirs: default_search_dirs(),
            released_cache: default_released_cache(),
        }
    }
}

/// Command executor deadlines (seconds).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ExecConfig {
    /// Default deadline for one-shot commands.
    #[serde(default = "default_exec_timeout")]
    pub timeout_seconds: u64,
    /// Deadline for the login-shell environment import.
    #[serde(default = "default_login_env_timeout")]
    pub login_env_timeout_seconds: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_exec_timeout(),
            login_env_timeout_seconds: default_login_env_timeout(),
        }
    }
}

/// How inbound permission prompts are answered by the CLI.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionPolicy {
    /// Ask on the terminal.
    #[default]
    Ask,
    /// Pick the first allow option.
    Allow,
    /// Pick a reject option.
    Reject,
}

/// Host capability settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HostConfig {
    /// Confine agent file access to the agent's working directory.
    #[serde(default)]
    pub confine_fs_to_cwd: bool,
    /// Permission prompt policy.
    #[serde(default)]
    pub permission: PermissionPolicy,
}

/// Authentication settings. Secrets are never read from the TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AuthConfig {
    /// Preferred auth method id.
    #[serde(default)]
    pub method_id: Option<String>,
    /// Keyring entry name under the `acp-engine` service.
    #[serde(default = "default_credential_key")]
    pub credential_key: String,
    /// Environment variable consulted when the keyring has nothing.
    #[serde(default = "default_credential_env")]
    pub credential_env: String,
    /// Name of the credential in the `authenticate` payload.
    #[serde(default = "default_credential_field")]
    pub credential_field: String,
}

fn default_cwd() -> PathBuf {
    PathBuf::from(".")
}

fn default_true() -> bool {
    true
}

fn default_protocol_version() -> u16 {
    PROTOCOL_VERSION
}

fn default_search_dirs() -> Vec<PathBuf> {
    DEFAULT_SEARCH_DIRS.iter().map(PathBuf::from).collect()
}

fn default_released_cache() -> usize {
    DEFAULT_RELEASED_CACHE
}

fn default_exec_timeout() -> u64 {
    30
}

fn default_login_env_timeout() -> u64 {
    5
}

fn default_credential_key() -> String {
    "api_key".into()
}

fn default_credential_env() -> String {
    "AGENT_API_KEY".into()
}

fn default_credential_field() -> String {
    "apiKey".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Agent launch settings.
    pub agent: AgentConfig,
    /// Terminal defaults.
    #[serde(default)]
    pub terminal: TerminalConfig,
    /// Executor deadlines.
    #[serde(default)]
    pub exec: ExecConfig,
    /// Host capability settings.
    #[serde(default)]
    pub host: HostConfig,
    /// Authentication settings; absent means never authenticate.
    #[serde(default)]
    pub auth: Option<AuthConfig>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Outbound request deadline, `None` when disabled.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.agent.request_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.agent.request_timeout_seconds))
    }

    /// Default executor deadline.
    #[must_use]
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec.timeout_seconds)
    }

    /// Launch settings for the agent process.
    #[must_use]
    pub fn spawn_config(&self) -> SpawnConfig {
        SpawnConfig {
            command: self.agent.command.clone(),
            args: self.agent.args.clone(),
            cwd: self.agent.cwd.clone(),
            env: self.agent.env.clone(),
            load_login_env: self.agent.load_login_env,
            login_env_timeout: Duration::from_secs(self.exec.login_env_timeout_seconds),
        }
    }

    /// Settings for the terminal manager.
    #[must_use]
    pub fn terminal_settings(&self) -> TerminalSettings {
        TerminalSettings {
            default_output_limit: self.terminal.output_byte_limit,
            search_dirs: self.terminal.search_dirs.clone(),
            released_cache: self.terminal.released_cache,
        }
    }

    /// Load the agent credential from OS keychain with env-var fallback.
    ///
    /// Returns `Ok(None)` when no `[auth]` section is configured.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `[auth]` is configured but neither the
    /// keychain nor the environment provides the credential.
    pub async fn load_credentials(&self) -> Result<Option<AuthCredentials>> {
        let Some(auth) = &self.auth else {
            return Ok(None);
        };
        let secret = load_credential(&auth.credential_key, &auth.credential_env).await?;
        Ok(Some(AuthCredentials {
            method_id: auth.method_id.clone(),
            credentials: BTreeMap::from([(auth.credential_field.clone(), secret)]),
        }))
    }

    fn validate(&mut self) -> Result<()> {
        if self.agent.command.trim().is_empty() {
            return Err(AppError::Config("agent.command must not be empty".into()));
        }

        if self.exec.timeout_seconds == 0 {
            return Err(AppError::Config(
                "exec.timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.terminal.output_byte_limit == Some(0) {
            return Err(AppError::Config(
                "terminal.output_byte_limit must be greater than zero".into(),
            ));
        }

        let canonical_cwd = self
            .agent
            .cwd
            .canonicalize()
            .map_err(|err| AppError::Config(format!("agent.cwd invalid: {err}")))?;
        self.agent.cwd = canonical_cwd;

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // Try OS keychain first via spawn_blocking (keyring is synchronous I/O).
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    // Fallback to environment variable.
    env::var(env_key).map_err(|_| {
        AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))
    })
}
