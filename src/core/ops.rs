//! File operation data model
//!
//! `FileOperation` is what the apply engine consumes; `FileUpdate` is what the
//! response parser produces. Paths are workspace-relative strings throughout.

use serde::{Deserialize, Serialize};

/// Kind of mutation a single operation performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    PartialUpdate,
    Delete,
    Rename,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::PartialUpdate => "partial-update",
            OperationKind::Delete => "delete",
            OperationKind::Rename => "rename",
        };
        f.pad(s)
    }
}

/// Shape violations detected before any I/O
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    #[error("{kind} of {path} has no content")]
    MissingContent { kind: OperationKind, path: String },

    #[error("partial update of {path} needs both start and end line")]
    MissingRange { path: String },

    #[error("partial update of {path} has invalid range {start}-{end}")]
    InvalidRange {
        path: String,
        start: usize,
        end: usize,
    },

    #[error("rename to {path} has no original path")]
    MissingOriginalPath { path: String },
}

/// A single file mutation relative to the workspace root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOperation {
    pub kind: OperationKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub reason: String,
    /// 1-based inclusive; partial updates only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<usize>,
    /// 1-based inclusive; partial updates only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<usize>,
    /// Source path; renames only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_path: Option<String>,
}

impl FileOperation {
    fn bare(kind: OperationKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            content: None,
            reason: String::new(),
            start_line: None,
            end_line: None,
            original_path: None,
        }
    }

    pub fn create(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::bare(OperationKind::Create, path)
        }
    }

    pub fn update(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::bare(OperationKind::Update, path)
        }
    }

    pub fn partial_update(
        path: impl Into<String>,
        start_line: usize,
        end_line: usize,
        content: impl Into<String>,
    ) -> Self {
        Self {
            content: Some(content.into()),
            start_line: Some(start_line),
            end_line: Some(end_line),
            ..Self::bare(OperationKind::PartialUpdate, path)
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::bare(OperationKind::Delete, path)
    }

    pub fn rename(original_path: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            original_path: Some(original_path.into()),
            ..Self::bare(OperationKind::Rename, path)
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Check field presence for the operation kind.
    pub fn check_shape(&self) -> Result<(), OperationError> {
        match self.kind {
            OperationKind::Create | OperationKind::Update => {
                if self.content.is_none() {
                    return Err(OperationError::MissingContent {
                        kind: self.kind,
                        path: self.path.clone(),
                    });
                }
            }
            OperationKind::PartialUpdate => {
                if self.content.is_none() {
                    return Err(OperationError::MissingContent {
                        kind: self.kind,
                        path: self.path.clone(),
                    });
                }
                let (Some(start), Some(end)) = (self.start_line, self.end_line) else {
                    return Err(OperationError::MissingRange {
                        path: self.path.clone(),
                    });
                };
                if start == 0 || start > end {
                    return Err(OperationError::InvalidRange {
                        path: self.path.clone(),
                        start,
                        end,
                    });
                }
            }
            OperationKind::Rename => {
                if self.original_path.is_none() {
                    return Err(OperationError::MissingOriginalPath {
                        path: self.path.clone(),
                    });
                }
            }
            OperationKind::Delete => {}
        }
        Ok(())
    }
}

/// Classification the parser can infer from model output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Create,
    Update,
    Delete,
}

/// A whole-file change extracted from a model response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUpdate {
    pub path: String,
    pub content: String,
    pub kind: UpdateKind,
    pub summary: String,
    pub estimated_lines_changed: usize,
}

impl From<FileUpdate> for FileOperation {
    fn from(u: FileUpdate) -> Self {
        let op = match u.kind {
            UpdateKind::Create => FileOperation::create(u.path, u.content),
            UpdateKind::Update => FileOperation::update(u.path, u.content),
            UpdateKind::Delete => FileOperation::delete(u.path),
        };
        op.with_reason(u.summary)
    }
}

/// Parser output: best-effort updates plus non-fatal warnings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseResult {
    pub updates: Vec<FileUpdate>,
    pub warnings: Vec<String>,
}

impl ParseResult {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn into_operations(self) -> Vec<FileOperation> {
        self.updates.into_iter().map(FileOperation::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_update_shape_requires_ordered_range() {
        assert!(
            FileOperation::partial_update("a.rs", 2, 3, "x")
                .check_shape()
                .is_ok()
        );
        assert_eq!(
            FileOperation::partial_update("a.rs", 4, 3, "x").check_shape(),
            Err(OperationError::InvalidRange {
                path: "a.rs".into(),
                start: 4,
                end: 3
            })
        );
        assert!(
            FileOperation::partial_update("a.rs", 0, 3, "x")
                .check_shape()
                .is_err()
        );

        let mut op = FileOperation::partial_update("a.rs", 1, 1, "x");
        op.end_line = None;
        assert!(matches!(
            op.check_shape(),
            Err(OperationError::MissingRange { .. })
        ));
    }

    #[test]
    fn create_without_content_is_rejected() {
        let mut op = FileOperation::create("a.rs", "");
        op.content = None;
        assert!(matches!(
            op.check_shape(),
            Err(OperationError::MissingContent { .. })
        ));
        assert!(FileOperation::delete("gone.rs").check_shape().is_ok());
    }

    #[test]
    fn update_converts_with_summary_as_reason() {
        let u = FileUpdate {
            path: "src/lib.rs".into(),
            content: "fn x() {}".into(),
            kind: UpdateKind::Update,
            summary: "tidy".into(),
            estimated_lines_changed: 1,
        };
        let op = FileOperation::from(u);
        assert_eq!(op.kind, OperationKind::Update);
        assert_eq!(op.reason, "tidy");
        assert_eq!(op.content.as_deref(), Some("fn x() {}"));
    }
}
