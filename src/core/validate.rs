//! Path-safety gate for workspace-relative operation paths.
//!
//! Pure: no filesystem access. Paths arrive from model output, so both `/` and
//! `\` are treated as separators on every platform.

use std::path::{Component, Path, PathBuf};

use crate::core::ops::{FileOperation, OperationKind};

/// Reason a path was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("empty path")]
    Empty,

    #[error("path must be workspace-relative: {0}")]
    Absolute(String),

    #[error("path escapes workspace: {0}")]
    Traversal(String),

    #[error("path contains illegal character {ch:?}: {path}")]
    IllegalChar { path: String, ch: char },
}

#[cfg(windows)]
const RESERVED: &[char] = &['<', '>', ':', '"', '|', '?', '*'];
#[cfg(not(windows))]
const RESERVED: &[char] = &[];

/// True when `path` is safe to resolve under `workspace_root`.
pub fn is_safe_path(path: &str, workspace_root: &Path) -> bool {
    match validate_rel(path) {
        Ok(rel) => workspace_root.join(rel).starts_with(workspace_root),
        Err(_) => false,
    }
}

/// Validate and normalize a workspace-relative path, dropping `.` segments.
pub fn validate_rel(path: &str) -> Result<PathBuf, PathError> {
    if path.trim().is_empty() {
        return Err(PathError::Empty);
    }

    if let Some(ch) = path
        .chars()
        .find(|c| c.is_control() || RESERVED.contains(c))
    {
        return Err(PathError::IllegalChar {
            path: path.to_string(),
            ch,
        });
    }

    if path.starts_with('/') || path.starts_with('\\') || has_drive_prefix(path) {
        return Err(PathError::Absolute(path.to_string()));
    }

    let mut out = PathBuf::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => return Err(PathError::Traversal(path.to_string())),
            s => out.push(s),
        }
    }

    // Host-specific forms the split above cannot see (e.g. verbatim prefixes)
    for c in out.components() {
        match c {
            Component::Normal(_) => {}
            Component::ParentDir => return Err(PathError::Traversal(path.to_string())),
            Component::CurDir => {}
            Component::Prefix(_) | Component::RootDir => {
                return Err(PathError::Absolute(path.to_string()));
            }
        }
    }

    if out.as_os_str().is_empty() {
        return Err(PathError::Empty);
    }
    Ok(out)
}

/// `C:` style prefixes, rejected on every host
fn has_drive_prefix(path: &str) -> bool {
    let b = path.as_bytes();
    b.len() >= 2 && b[0].is_ascii_alphabetic() && b[1] == b':'
}

/// First failing path in a batch, rendered as a single validation error.
pub fn validate_batch(operations: &[FileOperation], workspace_root: &Path) -> Option<String> {
    for op in operations {
        if !is_safe_path(&op.path, workspace_root) {
            let reason = validate_rel(&op.path)
                .err()
                .map(|e| e.to_string())
                .unwrap_or_else(|| format!("unsafe path: {}", op.path));
            return Some(format!("Invalid path for {} operation: {}", op.kind, reason));
        }
        if op.kind == OperationKind::Rename
            && let Some(src) = &op.original_path
            && !is_safe_path(src, workspace_root)
        {
            let reason = validate_rel(src)
                .err()
                .map(|e| e.to_string())
                .unwrap_or_else(|| format!("unsafe path: {src}"));
            return Some(format!("Invalid source path for rename: {reason}"));
        }
        if let Err(e) = op.check_shape() {
            return Some(format!("Invalid operation: {e}"));
        }
    }
    None
}
