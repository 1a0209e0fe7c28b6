//! Executable resolution for terminal commands.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::TerminalError;

/// Directories searched before falling back to a `PATH` lookup.
pub const DEFAULT_SEARCH_DIRS: &[&str] = &[
    "/opt/homebrew/bin",
    "/usr/local/bin",
    "/usr/bin",
    "/bin",
    "/usr/sbin",
    "/sbin",
];

/// Resolve `program` to an executable path.
///
/// - A path with a directory component must exist (relative ones are
///   taken against `cwd`).
/// - A bare name is looked up in `search_dirs`, then on `PATH`.
///
/// # Errors
///
/// Returns [`TerminalError::ExecutableNotFound`] when nothing matches.
pub fn resolve_executable(
    program: &str,
    search_dirs: &[PathBuf],
    cwd: Option<&Path>,
) -> Result<PathBuf, TerminalError> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        let full = match cwd {
            Some(cwd) if candidate.is_relative() => cwd.join(candidate),
            _ => candidate.to_path_buf(),
        };
        return if full.is_file() {
            Ok(full)
        } else {
            Err(TerminalError::ExecutableNotFound(program.to_owned()))
        };
    }

    if let Some(found) = search_dirs
        .iter()
        .map(|dir| dir.join(program))
        .find(|path| is_executable(path))
    {
        debug!(program, path = %found.display(), "resolved from search dirs");
        return Ok(found);
    }

    which::which(program).map_err(|_| TerminalError::ExecutableNotFound(program.to_owned()))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
