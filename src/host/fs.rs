//! File access offered to the agent (`fs/read_text_file`, `fs/write_text_file`).
//!
//! Reads support a 1-indexed, inclusive line window. Writes go to a
//! temporary file in the target directory which is then renamed over the
//! target, so readers never observe a half-written file.
//!
//! When a root is configured every path must resolve inside it; `..`
//! traversal and symlinks pointing outside are rejected.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::models::protocol::{ReadTextFileRequest, ReadTextFileResponse, WriteTextFileRequest};
use crate::{AppError, Result};

/// File access policy.
#[derive(Debug, Clone, Default)]
pub struct FileAccess {
    root: Option<PathBuf>,
}

impl FileAccess {
    /// Unrestricted access.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self { root: None }
    }

    /// Access confined to `root`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if `root` cannot be canonicalized.
    pub fn confined_to(root: impl AsRef<Path>) -> Result<Self> {
        let root = root
            .as_ref()
            .canonicalize()
            .map_err(|err| AppError::Config(format!("file access root invalid: {err}")))?;
        Ok(Self { root: Some(root) })
    }

    /// Serve `fs/read_text_file`.
    ///
    /// # Errors
    ///
    /// - [`AppError::PermissionDenied`] for a path outside the root.
    /// - [`AppError::Io`] if the file cannot be read.
    pub async fn read_text_file(&self, request: &ReadTextFileRequest) -> Result<ReadTextFileResponse> {
        let path = self.check(&request.path)?;
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| AppError::Io(format!("failed to read {}: {err}", path.display())))?;

        let end_line = request.end_line.or_else(|| {
            request
                .limit
                .map(|limit| request.start_line.unwrap_or(1).saturating_add(limit).saturating_sub(1))
        });
        let response = select_lines(&text, request.start_line, end_line);
        debug!(
            path = %path.display(),
            total_lines = response.total_lines,
            start_line = ?request.start_line,
            end_line = ?end_line,
            "file read"
        );
        Ok(response)
    }

    /// Serve `fs/write_text_file`.
    ///
    /// # Errors
    ///
    /// - [`AppError::PermissionDenied`] for a path outside the root.
    /// - [`AppError::Io`] on directory creation, write, or rename failure.
    pub async fn write_text_file(&self, request: WriteTextFileRequest) -> Result<()> {
        let path = self.check(&request.path)?;
        let bytes = request.content.len();
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&target, &request.content))
            .await
            .map_err(|err| AppError::Io(format!("write task failed: {err}")))??;
        debug!(path = %path.display(), bytes, "file written");
        Ok(())
    }

    fn check(&self, candidate: &Path) -> Result<PathBuf> {
        match &self.root {
            None => Ok(candidate.to_path_buf()),
            Some(root) => confine(root, candidate),
        }
    }
}

/// Cut the 1-indexed inclusive window `[start, end]` out of `text`.
///
/// Without a window the text is returned unchanged. `total_lines` always
/// counts the whole file.
#[must_use]
pub fn select_lines(text: &str, start: Option<usize>, end: Option<usize>) -> ReadTextFileResponse {
    let total_lines = text.lines().count();
    if start.is_none() && end.is_none() {
        return ReadTextFileResponse {
            content: text.to_owned(),
            total_lines,
        };
    }

    let first = start.unwrap_or(1).max(1);
    let last = end.unwrap_or(total_lines);
    let content = if last < first {
        String::new()
    } else {
        text.lines()
            .skip(first - 1)
            .take(last - first + 1)
            .collect::<Vec<_>>()
            .join("\n")
    };
    ReadTextFileResponse {
        content,
        total_lines,
    }
}

fn write_atomically(path: &Path, content: &str) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|err| {
        AppError::Io(format!(
            "failed to create parent directories for {}: {err}",
            path.display()
        ))
    })?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|err| AppError::Io(format!("failed to create temporary file: {err}")))?;
    tmp.write_all(content.as_bytes())
        .map_err(|err| AppError::Io(format!("failed to write temporary file: {err}")))?;

    // Keep the mode of an existing file (e.g. executable scripts).
    if let Ok(meta) = std::fs::metadata(path) {
        if let Err(err) = std::fs::set_permissions(tmp.path(), meta.permissions()) {
            debug!(path = %path.display(), %err, "could not copy permissions");
        }
    }

    tmp.persist(path)
        .map_err(|err| AppError::Io(format!("failed to persist {}: {err}", path.display())))?;
    Ok(())
}

/// Resolve `candidate` inside `root` or fail.
///
/// Relative paths are taken against `root`. Symlinks are followed through
/// the deepest existing ancestor, so a new file under a linked directory is
/// judged by where it would really land.
fn confine(root: &Path, candidate: &Path) -> Result<PathBuf> {
    let mut normalized = if candidate.is_absolute() {
        PathBuf::new()
    } else {
        root.to_path_buf()
    };
    for component in candidate.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(AppError::PermissionDenied(format!(
                        "{} escapes {}",
                        candidate.display(),
                        root.display()
                    )));
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                normalized.clear();
                normalized.push(component.as_os_str());
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    let resolved = resolve_existing(&normalized)?;
    if !resolved.starts_with(root) {
        return Err(AppError::PermissionDenied(format!(
            "{} is outside {}",
            candidate.display(),
            root.display()
        )));
    }
    Ok(resolved)
}

/// Canonicalize the longest existing prefix of `path` and re-append the rest.
fn resolve_existing(path: &Path) -> Result<PathBuf> {
    let mut existing = path;
    let mut missing = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_owned());
                existing = parent;
            }
            _ => return Ok(path.to_path_buf()),
        }
    }
    let mut resolved = existing
        .canonicalize()
        .map_err(|err| AppError::Io(format!("cannot resolve {}: {err}", existing.display())))?;
    resolved.extend(missing.iter().rev());
    Ok(resolved)
}
