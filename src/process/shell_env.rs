//! Login-shell environment import.
//!
//! GUI-launched hosts often start with a minimal `PATH`. Running the user's
//! shell in login mode and dumping its environment makes toolchains
//! installed via shell profiles visible to the spawned agent. This is best
//! effort: any failure is logged and the inherited environment is used.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use crate::process::executor::{self, CommandSpec};

/// Shell used when `$SHELL` is unset.
const FALLBACK_SHELL: &str = "/bin/sh";

/// Load the environment of a login shell, or `None` if that fails.
pub async fn load_login_env(timeout: Duration) -> Option<HashMap<String, String>> {
    if cfg!(not(unix)) {
        return None;
    }
    let shell = std::env::var("SHELL").unwrap_or_else(|_| FALLBACK_SHELL.to_owned());
    let spec = CommandSpec::new(&shell)
        .args(["-l", "-c", "env -0"])
        .timeout(timeout);

    match executor::run(&spec).await {
        Ok(raw) => {
            let env = parse_env_block(&raw);
            debug!(shell, vars = env.len(), "loaded login shell environment");
            Some(env)
        }
        Err(err) => {
            warn!(shell, %err, "could not load login shell environment, using inherited");
            None
        }
    }
}

/// Parse NUL-separated `KEY=value` records as printed by `env -0`.
///
/// Values may contain newlines; records without `=` are skipped.
#[must_use]
pub fn parse_env_block(raw: &str) -> HashMap<String, String> {
    raw.split('\0')
        .filter_map(|record| {
            let record = record.strip_prefix('\n').unwrap_or(record);
            let (key, value) = record.split_once('=')?;
            (!key.is_empty()).then(|| (key.to_owned(), value.to_owned()))
        })
        .collect()
}

/// Put `dir` in front of `PATH` in `env`, unless it is already first.
pub fn prepend_path(env: &mut HashMap<String, String>, dir: &Path) {
    let dir = dir.to_string_lossy();
    if dir.is_empty() {
        return;
    }
    let separator = if cfg!(windows) { ';' } else { ':' };
    let current = env.get("PATH").cloned().unwrap_or_default();
    if current.split(separator).next() == Some(dir.as_ref()) {
        return;
    }
    let updated = if current.is_empty() {
        dir.into_owned()
    } else {
        format!("{dir}{separator}{current}")
    };
    env.insert("PATH".to_owned(), updated);
}
