//! Undo/redo history of reversible actions
//!
//! Actions are trait objects owned by exactly one stack at a time. Executing a
//! new action either merges into the top of the undo stack (same target, inside
//! the merge window) or is pushed and invalidates the redo stack.

use std::any::Any;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::apply_engine::{ApplyEngine, ApplyResult, OutcomeStatus};
use crate::core::backup::BackupError;
use crate::core::ops::{FileOperation, OperationKind};
use crate::core::validate::{PathError, validate_rel};
use crate::infra::io::write_atomic;

/// Discriminator for introspecting a boxed action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    FileWrite,
    FileDelete,
    Composite,
    ApplyBatch,
}

#[derive(Debug, thiserror::Error)]
pub enum UndoError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error("batch not applied: {0}")]
    Batch(String),

    #[error("restore incomplete for backup {id}: {detail}")]
    IncompleteRestore { id: String, detail: String },
}

fn io_err(context: String) -> impl FnOnce(io::Error) -> UndoError {
    move |source| UndoError::Io { context, source }
}

/// A reversible unit of work
pub trait UndoableAction: fmt::Debug + Send + 'static {
    fn description(&self) -> String;

    /// Creation time; drives the merge window
    fn timestamp(&self) -> DateTime<Utc>;

    fn kind(&self) -> ActionKind;

    fn execute(&mut self) -> Result<(), UndoError>;

    fn undo(&mut self) -> Result<(), UndoError>;

    fn can_merge_with(&self, _other: &dyn UndoableAction) -> bool {
        false
    }

    /// Combine with a later action. Only called after `can_merge_with` agreed.
    fn merge_with(self: Box<Self>, other: Box<dyn UndoableAction>) -> Box<dyn UndoableAction>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

fn resolve(root: &Path, rel: &str) -> Result<PathBuf, UndoError> {
    Ok(root.join(validate_rel(rel)?))
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, UndoError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(format!("read {}", path.display()))(e)),
    }
}

fn remove_if_present(path: &Path) -> Result<(), UndoError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(format!("remove {}", path.display()))(e)),
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), UndoError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err(format!("create {}", parent.display())))?;
    }
    write_atomic(path, bytes).map_err(io_err(format!("write {}", path.display())))
}

/// Whole-file write; the previous content is captured on first execute
#[derive(Debug)]
pub struct FileWriteAction {
    root: PathBuf,
    path: String,
    before: Option<Vec<u8>>,
    after: Vec<u8>,
    captured: bool,
    at: DateTime<Utc>,
}

impl FileWriteAction {
    pub fn new(root: impl Into<PathBuf>, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            root: root.into(),
            path: path.into(),
            before: None,
            after: content.into(),
            captured: false,
            at: Utc::now(),
        }
    }

    /// Override the creation time.
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl UndoableAction for FileWriteAction {
    fn description(&self) -> String {
        format!("Write {}", self.path)
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.at
    }

    fn kind(&self) -> ActionKind {
        ActionKind::FileWrite
    }

    fn execute(&mut self) -> Result<(), UndoError> {
        let path = resolve(&self.root, &self.path)?;
        if !self.captured {
            self.before = read_optional(&path)?;
            self.captured = true;
        }
        write_file(&path, &self.after)
    }

    fn undo(&mut self) -> Result<(), UndoError> {
        let path = resolve(&self.root, &self.path)?;
        match &self.before {
            Some(bytes) => write_file(&path, bytes),
            None => remove_if_present(&path),
        }
    }

    fn can_merge_with(&self, other: &dyn UndoableAction) -> bool {
        other
            .as_any()
            .downcast_ref::<FileWriteAction>()
            .is_some_and(|o| o.root == self.root && o.path == self.path)
    }

    fn merge_with(self: Box<Self>, other: Box<dyn UndoableAction>) -> Box<dyn UndoableAction> {
        match other.into_any().downcast::<FileWriteAction>() {
            // Oldest "before", newest "after"; the window slides with each merge
            Ok(later) => Box::new(FileWriteAction {
                before: self.before,
                captured: self.captured,
                after: later.after,
                at: later.at,
                root: self.root,
                path: self.path,
            }),
            Err(_) => self,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// File removal that keeps the removed bytes for undo
#[derive(Debug)]
pub struct FileDeleteAction {
    root: PathBuf,
    path: String,
    removed: Option<Vec<u8>>,
    at: DateTime<Utc>,
}

impl FileDeleteAction {
    pub fn new(root: impl Into<PathBuf>, path: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            path: path.into(),
            removed: None,
            at: Utc::now(),
        }
    }
}

impl UndoableAction for FileDeleteAction {
    fn description(&self) -> String {
        format!("Delete {}", self.path)
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.at
    }

    fn kind(&self) -> ActionKind {
        ActionKind::FileDelete
    }

    fn execute(&mut self) -> Result<(), UndoError> {
        let path = resolve(&self.root, &self.path)?;
        self.removed = read_optional(&path)?;
        remove_if_present(&path)
    }

    fn undo(&mut self) -> Result<(), UndoError> {
        match &self.removed {
            Some(bytes) => write_file(&resolve(&self.root, &self.path)?, bytes),
            None => Ok(()),
        }
    }

    fn merge_with(self: Box<Self>, _other: Box<dyn UndoableAction>) -> Box<dyn UndoableAction> {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Ordered group undone as one step, in reverse order
#[derive(Debug)]
pub struct CompositeAction {
    description: String,
    actions: Vec<Box<dyn UndoableAction>>,
    at: DateTime<Utc>,
}

impl CompositeAction {
    pub fn new(description: impl Into<String>, actions: Vec<Box<dyn UndoableAction>>) -> Self {
        Self {
            description: description.into(),
            actions,
            at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl UndoableAction for CompositeAction {
    fn description(&self) -> String {
        self.description.clone()
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.at
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Composite
    }

    /// A failing child rolls back the children that already ran.
    fn execute(&mut self) -> Result<(), UndoError> {
        for i in 0..self.actions.len() {
            if let Err(e) = self.actions[i].execute() {
                for done in self.actions[..i].iter_mut().rev() {
                    if let Err(undo_err) = done.undo() {
                        warn!(action = %done.description(), error = %undo_err, "rollback step failed");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Every child is attempted; the first error is returned.
    fn undo(&mut self) -> Result<(), UndoError> {
        let mut first = None;
        for action in self.actions.iter_mut().rev() {
            if let Err(e) = action.undo() {
                warn!(action = %action.description(), error = %e, "undo step failed");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    fn merge_with(self: Box<Self>, _other: Box<dyn UndoableAction>) -> Box<dyn UndoableAction> {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// An [`ApplyEngine`] batch; undo restores its backup and removes files the
/// batch brought into existence
#[derive(Debug)]
pub struct ApplyBatchAction {
    engine: ApplyEngine,
    operations: Vec<FileOperation>,
    description: String,
    created: Vec<String>,
    last: Option<ApplyResult>,
    at: DateTime<Utc>,
}

impl ApplyBatchAction {
    pub fn new(engine: ApplyEngine, operations: Vec<FileOperation>) -> Self {
        let description = format!("Apply {} operation(s)", operations.len());
        Self {
            engine,
            operations,
            description,
            created: Vec::new(),
            last: None,
            at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Report of the most recent execute.
    pub fn last_result(&self) -> Option<&ApplyResult> {
        self.last.as_ref()
    }

    /// Indices of operations whose target is absent right now and would be
    /// brought into existence.
    fn absent_targets(&self) -> Vec<usize> {
        let root = self.engine.workspace_root();
        self.operations
            .iter()
            .enumerate()
            .filter(|(_, op)| {
                matches!(
                    op.kind,
                    OperationKind::Create | OperationKind::Update | OperationKind::Rename
                )
            })
            .filter(|(_, op)| {
                validate_rel(&op.path)
                    .map(|rel| !root.join(rel).exists())
                    .unwrap_or(false)
            })
            .map(|(i, _)| i)
            .collect()
    }
}

impl UndoableAction for ApplyBatchAction {
    fn description(&self) -> String {
        self.description.clone()
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.at
    }

    fn kind(&self) -> ActionKind {
        ActionKind::ApplyBatch
    }

    /// Fails only when nothing was applied; partial batches are recorded so
    /// they can be undone.
    fn execute(&mut self) -> Result<(), UndoError> {
        let absent = self.absent_targets();
        let result = self.engine.apply(&self.operations);

        if result.success_count == 0 && (!result.errors.is_empty() || result.cancelled) {
            let reason = if result.errors.is_empty() {
                "cancelled".to_string()
            } else {
                result.errors.join("; ")
            };
            self.last = Some(result);
            return Err(UndoError::Batch(reason));
        }

        // Only targets this batch actually wrote are ours to remove on undo
        self.created = absent
            .into_iter()
            .filter(|&i| {
                result
                    .operations
                    .get(i)
                    .is_some_and(|o| o.status == OutcomeStatus::Applied)
            })
            .map(|i| self.operations[i].path.clone())
            .collect();
        self.last = Some(result);
        Ok(())
    }

    /// Refuses, without touching anything, when the batch ran without its
    /// backup.
    fn undo(&mut self) -> Result<(), UndoError> {
        if let Some(e) = self.last.as_ref().and_then(|r| r.backup_error.as_ref()) {
            return Err(UndoError::Batch(format!(
                "no backup was taken for this batch ({e}); overwritten files cannot be restored"
            )));
        }

        let root = self.engine.workspace_root().to_path_buf();
        for rel in &self.created {
            remove_if_present(&resolve(&root, rel)?)?;
        }

        let Some(id) = self.last.as_ref().and_then(|r| r.backup_id.clone()) else {
            return Ok(());
        };
        let report = self.engine.backups().restore_backup(&id)?;
        if !report.is_complete() {
            let mut detail: Vec<String> = report
                .corrupt
                .iter()
                .map(|p| format!("{p} (checksum mismatch)"))
                .collect();
            detail.extend(report.failed.iter().map(|(p, e)| format!("{p} ({e})")));
            return Err(UndoError::IncompleteRestore {
                id,
                detail: detail.join(", "),
            });
        }
        debug!(backup = %id, restored = report.restored.len(), "batch undone");
        Ok(())
    }

    fn merge_with(self: Box<Self>, _other: Box<dyn UndoableAction>) -> Box<dyn UndoableAction> {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Two-stack history with time-windowed merging
#[derive(Debug)]
pub struct UndoRedoManager {
    undo_stack: Vec<Box<dyn UndoableAction>>,
    redo_stack: Vec<Box<dyn UndoableAction>>,
    merge_window: TimeDelta,
    max_depth: Option<usize>,
}

impl Default for UndoRedoManager {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoRedoManager {
    pub const DEFAULT_MERGE_WINDOW: Duration = Duration::from_secs(2);

    pub fn new() -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            merge_window: TimeDelta::seconds(2),
            max_depth: None,
        }
    }

    pub fn with_merge_window(mut self, window: Duration) -> Self {
        self.merge_window = TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX);
        self
    }

    /// Keep at most `depth` undo steps; 0 means unbounded.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = (depth > 0).then_some(depth);
        self
    }

    /// Run `action` and record it. A failed action leaves history untouched.
    pub fn execute(&mut self, mut action: Box<dyn UndoableAction>) -> Result<(), UndoError> {
        action.execute()?;

        let mergeable = self.undo_stack.last().is_some_and(|top| {
            action.timestamp() - top.timestamp() <= self.merge_window
                && top.can_merge_with(action.as_ref())
        });

        // A merge extends the current step; only a new step invalidates redo
        if mergeable && let Some(top) = self.undo_stack.pop() {
            debug!(action = %action.description(), "merged into previous step");
            self.undo_stack.push(top.merge_with(action));
            return Ok(());
        }

        debug!(action = %action.description(), "recorded");
        self.redo_stack.clear();
        self.undo_stack.push(action);
        if let Some(max) = self.max_depth
            && self.undo_stack.len() > max
        {
            let dropped = self.undo_stack.len() - max;
            self.undo_stack.drain(..dropped);
        }
        Ok(())
    }

    /// Revert the latest step. `Ok(false)` when there is nothing to undo; on
    /// error the step stays on the undo stack.
    pub fn undo(&mut self) -> Result<bool, UndoError> {
        let Some(mut action) = self.undo_stack.pop() else {
            return Ok(false);
        };
        if let Err(e) = action.undo() {
            self.undo_stack.push(action);
            return Err(e);
        }
        debug!(action = %action.description(), "undone");
        self.redo_stack.push(action);
        Ok(true)
    }

    /// Re-apply the latest undone step.
    pub fn redo(&mut self) -> Result<bool, UndoError> {
        let Some(mut action) = self.redo_stack.pop() else {
            return Ok(false);
        };
        if let Err(e) = action.execute() {
            self.redo_stack.push(action);
            return Err(e);
        }
        debug!(action = %action.description(), "redone");
        self.undo_stack.push(action);
        Ok(true)
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.last().map(|a| a.description())
    }

    pub fn redo_description(&self) -> Option<String> {
        self.redo_stack.last().map(|a| a.description())
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    /// Top of the undo stack, for inspecting what was just recorded.
    pub fn peek_undo(&self) -> Option<&dyn UndoableAction> {
        self.undo_stack.last().map(|a| a.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read(root: &Path, rel: &str) -> String {
        fs::read_to_string(root.join(rel)).unwrap()
    }

    #[test]
    fn undo_then_redo_restores_post_state() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("a.txt"), "v0").unwrap();

        let mut m = UndoRedoManager::new();
        m.execute(Box::new(FileWriteAction::new(root, "a.txt", "v1"))).unwrap();
        assert_eq!(read(root, "a.txt"), "v1");

        assert!(m.undo().unwrap());
        assert_eq!(read(root, "a.txt"), "v0");
        assert!(m.redo().unwrap());
        assert_eq!(read(root, "a.txt"), "v1");
        assert!(!m.redo().unwrap());
    }

    #[test]
    fn writes_inside_window_merge_into_one_step() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("a.txt"), "orig").unwrap();

        let t0 = Utc::now();
        let mut m = UndoRedoManager::new();
        m.execute(Box::new(FileWriteAction::new(root, "a.txt", "one").at(t0))).unwrap();
        m.execute(Box::new(
            FileWriteAction::new(root, "a.txt", "two").at(t0 + TimeDelta::milliseconds(500)),
        ))
        .unwrap();

        assert_eq!(m.undo_len(), 1);
        assert!(m.undo().unwrap());
        assert_eq!(read(root, "a.txt"), "orig");
        assert!(!m.can_undo());
    }

    #[test]
    fn writes_outside_window_stay_separate() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let t0 = Utc::now();
        let mut m = UndoRedoManager::new();
        m.execute(Box::new(FileWriteAction::new(root, "a.txt", "one").at(t0))).unwrap();
        m.execute(Box::new(
            FileWriteAction::new(root, "a.txt", "two").at(t0 + TimeDelta::seconds(3)),
        ))
        .unwrap();
        assert_eq!(m.undo_len(), 2);

        m.undo().unwrap();
        assert_eq!(read(root, "a.txt"), "one");
        m.undo().unwrap();
        assert!(!root.join("a.txt").exists());
    }

    #[test]
    fn fresh_action_invalidates_redo() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let mut m = UndoRedoManager::new();
        m.execute(Box::new(FileWriteAction::new(root, "a.txt", "a"))).unwrap();
        m.undo().unwrap();
        assert!(m.can_redo());

        m.execute(Box::new(FileWriteAction::new(root, "b.txt", "b"))).unwrap();
        assert_eq!(m.redo_len(), 0);
        assert!(!m.redo().unwrap());
        assert!(!root.join("a.txt").exists());
    }

    #[test]
    fn merge_keeps_redo_available() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let t0 = Utc::now();
        let mut m = UndoRedoManager::new();
        m.execute(Box::new(FileWriteAction::new(root, "b.txt", "b1").at(t0))).unwrap();
        m.execute(Box::new(
            FileWriteAction::new(root, "a.txt", "a").at(t0 + TimeDelta::seconds(5)),
        ))
        .unwrap();
        m.undo().unwrap();
        assert_eq!(m.redo_len(), 1);

        m.execute(Box::new(
            FileWriteAction::new(root, "b.txt", "b2").at(t0 + TimeDelta::milliseconds(500)),
        ))
        .unwrap();
        assert_eq!(m.undo_len(), 1);
        assert_eq!(m.redo_len(), 1);
        assert!(m.redo().unwrap());
        assert_eq!(read(root, "a.txt"), "a");
        assert_eq!(read(root, "b.txt"), "b2");
    }

    #[test]
    fn failed_execute_records_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut m = UndoRedoManager::new();
        let err = m
            .execute(Box::new(FileWriteAction::new(tmp.path(), "../escape.txt", "x")))
            .unwrap_err();
        assert!(matches!(err, UndoError::Path(_)));
        assert!(!m.can_undo());
    }

    #[test]
    fn delete_is_reversible() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("d.txt"), "keep me").unwrap();

        let mut m = UndoRedoManager::new();
        m.execute(Box::new(FileDeleteAction::new(root, "d.txt"))).unwrap();
        assert!(!root.join("d.txt").exists());
        m.undo().unwrap();
        assert_eq!(read(root, "d.txt"), "keep me");
        assert_eq!(m.redo_description().as_deref(), Some("Delete d.txt"));
    }

    #[test]
    fn composite_undoes_in_reverse_and_rolls_back_on_failure() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let mut m = UndoRedoManager::new();

        let group = CompositeAction::new(
            "two writes",
            vec![
                Box::new(FileWriteAction::new(root, "x.txt", "1")) as Box<dyn UndoableAction>,
                Box::new(FileWriteAction::new(root, "x.txt", "2")) as Box<dyn UndoableAction>,
            ],
        );
        m.execute(Box::new(group)).unwrap();
        assert_eq!(read(root, "x.txt"), "2");
        m.undo().unwrap();
        assert!(!root.join("x.txt").exists());

        let broken = CompositeAction::new(
            "broken",
            vec![
                Box::new(FileWriteAction::new(root, "y.txt", "1")) as Box<dyn UndoableAction>,
                Box::new(FileWriteAction::new(root, "/abs.txt", "2")) as Box<dyn UndoableAction>,
            ],
        );
        assert!(m.execute(Box::new(broken)).is_err());
        assert!(!root.join("y.txt").exists());
    }

    #[test]
    fn max_depth_drops_oldest() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let mut m = UndoRedoManager::new().with_max_depth(2);
        for name in ["a.txt", "b.txt", "c.txt"] {
            m.execute(Box::new(FileWriteAction::new(root, name, "x"))).unwrap();
        }
        assert_eq!(m.undo_len(), 2);
        assert_eq!(m.undo_description().as_deref(), Some("Write c.txt"));
    }

    #[test]
    fn kind_discriminates_boxed_actions() {
        let tmp = TempDir::new().unwrap();
        let mut m = UndoRedoManager::new();
        m.execute(Box::new(FileDeleteAction::new(tmp.path(), "none.txt"))).unwrap();
        assert_eq!(m.peek_undo().map(|a| a.kind()), Some(ActionKind::FileDelete));
    }
}
