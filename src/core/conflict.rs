//! Conflict classification for file operations
//!
//! A conflict is an operation whose precondition on the current workspace does
//! not hold (creating a file that exists, deleting one that does not). Shared by
//! preview and the standalone conflict query. Read-only.

use serde::Serialize;
use std::path::Path;

use crate::core::ops::{FileOperation, OperationKind};
use crate::core::validate::validate_rel;

/// Specific precondition that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Create targets a file that already exists
    CreateExisting,
    /// Delete targets a file that is already gone
    DeleteMissing,
    /// Partial update of a file that does not exist
    PartialUpdateMissing,
    /// Rename whose source does not exist
    RenameSourceMissing,
    /// Rename onto an existing file
    RenameTargetExists,
}

/// One conflicting operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub path: String,
    pub kind: ConflictKind,
    pub message: String,
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

fn exists(root: &Path, rel: &str) -> bool {
    validate_rel(rel)
        .map(|p| root.join(p).exists())
        .unwrap_or(false)
}

/// Classify a single operation; unsafe paths are left to validation.
pub fn classify(op: &FileOperation, workspace_root: &Path) -> Option<Conflict> {
    validate_rel(&op.path).ok()?;
    let target_exists = exists(workspace_root, &op.path);

    let (kind, message) = match op.kind {
        OperationKind::Create if target_exists => (
            ConflictKind::CreateExisting,
            format!("create: {} already exists and would be overwritten", op.path),
        ),
        OperationKind::Delete if !target_exists => (
            ConflictKind::DeleteMissing,
            format!("delete: {} does not exist", op.path),
        ),
        OperationKind::PartialUpdate if !target_exists => (
            ConflictKind::PartialUpdateMissing,
            format!("partial update: {} does not exist", op.path),
        ),
        OperationKind::Rename => {
            let src = op.original_path.as_deref().unwrap_or_default();
            if !exists(workspace_root, src) {
                (
                    ConflictKind::RenameSourceMissing,
                    format!("rename: source {src} does not exist"),
                )
            } else if target_exists {
                (
                    ConflictKind::RenameTargetExists,
                    format!("rename: destination {} already exists", op.path),
                )
            } else {
                return None;
            }
        }
        _ => return None,
    };

    Some(Conflict {
        path: op.path.clone(),
        kind,
        message,
    })
}

/// Conflicts for a whole batch, in operation order.
pub fn detect_conflicts(operations: &[FileOperation], workspace_root: &Path) -> Vec<Conflict> {
    operations
        .iter()
        .filter_map(|op| classify(op, workspace_root))
        .collect()
}
