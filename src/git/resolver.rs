//! Turns the untrusted path from an SSH exec command into a validated
//! `(workspace, repository)` pair.
//!
//! Accepted forms: `workspace/repo`, optionally suffixed with `.git`,
//! optionally prefixed with a single `/`, optionally wrapped in one pair of
//! matching single or double quotes (what a POSIX shell-quoting client sends).

use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::git::validation::{validate_repository_name, validate_workspace_slug};

/// Resolve a raw exec path into `(workspace, repo_name)`.
pub fn resolve(raw_path: &str) -> Result<(String, String)> {
    let unquoted = strip_quotes(raw_path)?;
    let path = unquoted.strip_prefix('/').unwrap_or(unquoted);
    let path = path.strip_suffix(".git").unwrap_or(path);

    let segments: Vec<&str> = path.split('/').collect();
    let [workspace, name] = segments.as_slice() else {
        return Err(invalid_format(raw_path));
    };
    if workspace.is_empty() || name.is_empty() {
        return Err(invalid_format(raw_path));
    }

    validate_workspace_slug(workspace)?;
    validate_repository_name(name)?;

    Ok((workspace.to_string(), name.to_string()))
}

/// Canonical on-disk location: `{root}/{workspace}/{name}.git`.
///
/// Callers must pass segments that went through [`resolve`] or the name
/// validators.
pub fn repository_path(root: &Path, workspace: &str, name: &str) -> PathBuf {
    root.join(workspace).join(format!("{}.git", name))
}

fn strip_quotes(raw: &str) -> Result<&str> {
    let inner = match raw.chars().next() {
        Some(q @ ('\'' | '"')) => {
            if raw.len() < 2 || !raw.ends_with(q) {
                return Err(invalid_format(raw));
            }
            &raw[1..raw.len() - 1]
        }
        _ => raw,
    };

    if inner.contains(['\'', '"']) {
        return Err(invalid_format(raw));
    }
    Ok(inner)
}

fn invalid_format(raw: &str) -> AppError {
    AppError::InvalidPathFormat(format!("expected 'workspace/repository', got {:?}", raw))
}
