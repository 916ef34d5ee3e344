//! Transactional apply pipeline for parsed file operations
//!
//! `apply` runs in two phases:
//! 1. whole-batch validation; any unsafe path or malformed operation aborts
//!    before the filesystem is touched
//! 2. one backup covering every file the batch will overwrite, then sequential
//!    mutation where each failure is recorded and the batch continues. The
//!    backup is best-effort: if the store cannot be written the batch still
//!    runs, with `backup_id = None` and `backup_error` set
//!
//! Nothing is rolled back automatically; the backup id in the result is the
//! recovery handle.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::{
    core::{
        backup::BackupService,
        conflict::{Conflict, detect_conflicts},
        diff::{DiffLine, compute_diff},
        ops::{FileOperation, OperationKind},
        validate::{validate_batch, validate_rel},
    },
    infra::io::{TextLines, write_atomic},
};

/// Shared flag checked between operations
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn cancel(&self)
    {
        self.0
            .store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool
    {
        self.0
            .load(Ordering::SeqCst)
    }

    /// Re-arm for the next batch.
    pub fn reset(&self)
    {
        self.0
            .store(false, Ordering::SeqCst);
    }
}

/// Per-file entry of a preview
#[derive(Debug, Clone, Serialize)]
pub struct FilePreview
{
    pub path: String,
    pub kind: OperationKind,
    /// Whether the target currently exists
    pub exists: bool,
    /// Line diff against current content; empty when not applicable
    pub diff: Vec<DiffLine>,
}

/// Read-only forecast of a batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct Preview
{
    pub files: Vec<FilePreview>,
    pub conflicts: Vec<Conflict>,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub renamed: usize,
}

impl Preview
{
    pub fn has_conflicts(&self) -> bool
    {
        !self
            .conflicts
            .is_empty()
    }
}

/// Final state of one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus
{
    Applied,
    Failed,
    /// Not attempted (validation abort or cancellation)
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationOutcome
{
    pub path: String,
    pub kind: OperationKind,
    pub status: OutcomeStatus,
    pub error: Option<String>,
}

/// Batch report
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyResult
{
    pub success_count: usize,
    pub failure_count: usize,
    pub operations: Vec<OperationOutcome>,
    pub errors: Vec<String>,
    /// Set when the backup store could not be written; the batch ran anyway
    pub backup_error: Option<String>,
    /// Backup taken before mutation, if any file needed one
    pub backup_id: Option<String>,
    pub cancelled: bool,
}

impl ApplyResult
{
    /// Every operation applied and the batch ran to completion.
    pub fn is_success(&self) -> bool
    {
        self.errors
            .is_empty()
            && !self.cancelled
    }

    fn skipped(
        operations: &[FileOperation],
        error: String,
    ) -> Self
    {
        Self {
            operations: operations
                .iter()
                .map(|op| OperationOutcome {
                    path: op
                        .path
                        .clone(),
                    kind: op.kind,
                    status: OutcomeStatus::Skipped,
                    error: None,
                })
                .collect(),
            errors: vec![error],
            ..Self::default()
        }
    }
}

/// Applies batches of [`FileOperation`] inside one workspace
#[derive(Debug, Clone)]
pub struct ApplyEngine
{
    workspace_root: PathBuf,
    backups: BackupService,
    create_directories: bool,
    cancel: CancelToken,
}

impl ApplyEngine
{
    pub fn new(backups: BackupService) -> Self
    {
        Self {
            workspace_root: backups
                .workspace_root()
                .to_path_buf(),
            backups,
            create_directories: true,
            cancel: CancelToken::new(),
        }
    }

    /// Allow or refuse creating missing parent directories.
    pub fn with_create_directories(
        mut self,
        allow: bool,
    ) -> Self
    {
        self.create_directories = allow;
        self
    }

    pub fn with_cancel_token(
        mut self,
        token: CancelToken,
    ) -> Self
    {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken
    {
        &self.cancel
    }

    pub fn backups(&self) -> &BackupService
    {
        &self.backups
    }

    pub fn workspace_root(&self) -> &Path
    {
        &self.workspace_root
    }

    /// Diffs, conflicts and tallies for a batch without touching disk.
    #[instrument(skip_all, fields(ops = operations.len()))]
    pub fn preview(
        &self,
        operations: &[FileOperation],
    ) -> Preview
    {
        let mut preview = Preview {
            conflicts: self.check_conflicts(operations),
            ..Preview::default()
        };

        for op in operations
        {
            match op.kind
            {
                OperationKind::Create => preview.created += 1,
                OperationKind::Update | OperationKind::PartialUpdate => preview.updated += 1,
                OperationKind::Delete => preview.deleted += 1,
                OperationKind::Rename => preview.renamed += 1,
            }

            let current = self.read_current(&op.path);
            let exists = current.is_some();
            let diff = match (op.kind, current.as_deref())
            {
                (OperationKind::Update | OperationKind::Create, Some(old)) =>
                {
                    compute_diff(old, op.content.as_deref().unwrap_or_default())
                }
                (OperationKind::Update | OperationKind::Create, None) =>
                {
                    compute_diff("", op.content.as_deref().unwrap_or_default())
                }
                (OperationKind::PartialUpdate, Some(old)) => match splice(old, op)
                {
                    Ok(new) => compute_diff(old, &new),
                    Err(e) =>
                    {
                        debug!(path = %op.path, error = %e, "partial preview skipped");
                        Vec::new()
                    }
                },
                _ => Vec::new(),
            };

            preview
                .files
                .push(FilePreview {
                    path: op
                        .path
                        .clone(),
                    kind: op.kind,
                    exists,
                    diff,
                });
        }

        preview
    }

    /// The conflict list `preview` reports, as a standalone query.
    pub fn check_conflicts(
        &self,
        operations: &[FileOperation],
    ) -> Vec<Conflict>
    {
        detect_conflicts(operations, &self.workspace_root)
    }

    /// Validate, back up, then mutate. See the module docs for the phases.
    pub fn apply(
        &self,
        operations: &[FileOperation],
    ) -> ApplyResult
    {
        self.apply_with_progress(operations, |_| {})
    }

    /// [`apply`](Self::apply), reporting each outcome as soon as it is known.
    ///
    /// The callback runs between operations, so cancelling the token from it
    /// stops the batch before the next mutation.
    #[instrument(skip_all, fields(ops = operations.len(), root = %self.workspace_root.display()))]
    pub fn apply_with_progress(
        &self,
        operations: &[FileOperation],
        mut on_outcome: impl FnMut(&OperationOutcome),
    ) -> ApplyResult
    {
        // Phase 1: any bad operation rejects the whole batch
        if let Some(error) = validate_batch(operations, &self.workspace_root)
        {
            warn!(%error, "batch rejected before any I/O");
            return ApplyResult::skipped(operations, error);
        }

        // Phase 2: one backup for everything that will be overwritten
        let mut result = ApplyResult::default();
        let to_backup = self.backup_candidates(operations);
        if !to_backup.is_empty()
        {
            match self
                .backups
                .create_backup(&to_backup)
            {
                Ok(id) => result.backup_id = Some(id),
                Err(e) =>
                {
                    warn!(error = %e, "backup failed; applying without one");
                    result.backup_error = Some(e.to_string());
                }
            }
        }

        for op in operations
        {
            if self
                .cancel
                .is_cancelled()
            {
                result.cancelled = true;
            }
            if result.cancelled
            {
                result
                    .operations
                    .push(OperationOutcome {
                        path: op
                            .path
                            .clone(),
                        kind: op.kind,
                        status: OutcomeStatus::Skipped,
                        error: None,
                    });
            }
            else
            {
                self.apply_one(op, &mut result);
            }
            if let Some(outcome) = result
                .operations
                .last()
            {
                on_outcome(outcome);
            }
        }

        if result.cancelled
        {
            warn!(applied = result.success_count, "batch cancelled");
        }
        info!(
            applied = result.success_count,
            failed = result.failure_count,
            backup = result.backup_id.as_deref().unwrap_or("-"),
            "batch finished"
        );
        result
    }

    /// Mutate one operation and record its outcome.
    fn apply_one(
        &self,
        op: &FileOperation,
        result: &mut ApplyResult,
    )
    {
        match self.mutate(op)
        {
            Ok(()) =>
            {
                debug!(kind = %op.kind, path = %op.path, "applied");
                result.success_count += 1;
                result
                    .operations
                    .push(OperationOutcome {
                        path: op
                            .path
                            .clone(),
                        kind: op.kind,
                        status: OutcomeStatus::Applied,
                        error: None,
                    });
            }
            Err(e) =>
            {
                let msg = format!("{} {}: {e:#}", op.kind, op.path);
                warn!(error = %msg, "operation failed");
                result.failure_count += 1;
                result
                    .errors
                    .push(msg.clone());
                result
                    .operations
                    .push(OperationOutcome {
                        path: op
                            .path
                            .clone(),
                        kind: op.kind,
                        status: OutcomeStatus::Failed,
                        error: Some(msg),
                    });
            }
        }
    }

    /// Existing files the batch will overwrite, remove or move. A rename
    /// covers both its source and a destination it would replace.
    fn backup_candidates(
        &self,
        operations: &[FileOperation],
    ) -> Vec<String>
    {
        let mut paths: Vec<String> = Vec::new();
        for op in operations
        {
            let source = match op.kind
            {
                OperationKind::Rename => op
                    .original_path
                    .as_deref(),
                _ => None,
            };
            for target in source
                .into_iter()
                .chain([op
                    .path
                    .as_str()])
            {
                if self.exists(target) && !paths.iter().any(|p| p == target)
                {
                    paths.push(target.to_string());
                }
            }
        }
        paths
    }

    fn resolve(
        &self,
        rel: &str,
    ) -> Result<PathBuf>
    {
        let rel = validate_rel(rel)?;
        Ok(self
            .workspace_root
            .join(rel))
    }

    fn exists(
        &self,
        rel: &str,
    ) -> bool
    {
        self.resolve(rel)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    fn read_current(
        &self,
        rel: &str,
    ) -> Option<String>
    {
        let path = self
            .resolve(rel)
            .ok()?;
        fs::read_to_string(path).ok()
    }

    fn ensure_parent(
        &self,
        path: &Path,
    ) -> Result<()>
    {
        let Some(parent) = path.parent()
        else
        {
            return Ok(());
        };
        if parent.exists()
        {
            return Ok(());
        }
        if !self.create_directories
        {
            return Err(anyhow!(
                "parent directory {} does not exist and directory creation is disabled",
                parent.display()
            ));
        }
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))
    }

    fn mutate(
        &self,
        op: &FileOperation,
    ) -> Result<()>
    {
        let path = self.resolve(&op.path)?;
        match op.kind
        {
            OperationKind::Create | OperationKind::Update =>
            {
                self.ensure_parent(&path)?;
                let content = op
                    .content
                    .as_deref()
                    .unwrap_or_default();
                write_atomic(&path, content.as_bytes())
                    .with_context(|| format!("write {}", path.display()))
            }
            OperationKind::PartialUpdate =>
            {
                let old = fs::read_to_string(&path)
                    .with_context(|| format!("read {}", path.display()))?;
                let new = splice(&old, op)?;
                write_atomic(&path, new.as_bytes())
                    .with_context(|| format!("write {}", path.display()))
            }
            OperationKind::Delete => match fs::remove_file(&path)
            {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
            },
            OperationKind::Rename =>
            {
                let src = self.resolve(
                    op.original_path
                        .as_deref()
                        .unwrap_or_default(),
                )?;
                if let Some(parent) = path.parent()
                {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("create {}", parent.display()))?;
                }
                fs::rename(&src, &path)
                    .with_context(|| format!("move {} → {}", src.display(), path.display()))
            }
        }
    }
}

/// Replace the inclusive 1-based range with the operation's lines.
///
/// A range running past the end removes only what exists; a start beyond the
/// end appends. Line endings and the trailing newline follow the original.
fn splice(
    original: &str,
    op: &FileOperation,
) -> Result<String>
{
    let (Some(start), Some(end)) = (op.start_line, op.end_line)
    else
    {
        return Err(anyhow!("partial update of {} has no line range", op.path));
    };
    if start == 0 || start > end
    {
        return Err(anyhow!("invalid line range {start}-{end} for {}", op.path));
    }

    let mut text = TextLines::parse(original);
    let at = (start - 1).min(
        text.lines
            .len(),
    );
    let remove = (end - start + 1).min(
        text.lines
            .len()
            - at,
    );
    let replacement = op
        .content
        .as_deref()
        .unwrap_or_default()
        .lines()
        .map(|l| {
            l.trim_end_matches('\r')
                .to_string()
        });
    text.lines
        .splice(at..at + remove, replacement);
    if original.is_empty()
    {
        text.trailing_newline = true;
    }
    Ok(text.render())
}

#[cfg(test)]
mod tests
{
    use super::*;
    use tempfile::TempDir;

    fn engine(tmp: &TempDir) -> ApplyEngine
    {
        let ws = tmp
            .path()
            .join("ws");
        fs::create_dir_all(&ws).unwrap();
        ApplyEngine::new(BackupService::new(
            &ws,
            tmp.path()
                .join("backups"),
        ))
    }

    #[test]
    fn partial_update_replaces_inclusive_range()
    {
        let tmp = TempDir::new().unwrap();
        let eng = engine(&tmp);
        let f = eng
            .workspace_root()
            .join("five.txt");
        fs::write(&f, "line1\nline2\nline3\nline4\nline5\n").unwrap();

        let res = eng.apply(&[FileOperation::partial_update("five.txt", 2, 3, "X\nY")]);
        assert!(res.is_success(), "{:?}", res.errors);
        assert_eq!(fs::read_to_string(&f).unwrap(), "line1\nX\nY\nline4\nline5\n");
        assert!(res.backup_id.is_some());
    }

    #[test]
    fn splice_clamps_overrun_and_keeps_crlf()
    {
        let op = FileOperation::partial_update("a", 2, 99, "b");
        assert_eq!(splice("a\r\nx\r\ny\r\n", &op).unwrap(), "a\r\nb\r\n");

        let op = FileOperation::partial_update("a", 10, 12, "z");
        assert_eq!(splice("a\nb", &op).unwrap(), "a\nb\nz");
    }

    #[test]
    fn invalid_path_aborts_whole_batch()
    {
        let tmp = TempDir::new().unwrap();
        let eng = engine(&tmp);
        let ops = vec![
            FileOperation::create("ok.txt", "fine"),
            FileOperation::update("../../etc/passwd", "nope"),
        ];

        let res = eng.apply(&ops);
        assert_eq!(res.errors.len(), 1);
        assert!(res.errors[0].starts_with("Invalid path for update operation"));
        assert_eq!(res.success_count, 0);
        assert!(res.backup_id.is_none());
        assert!(!eng.workspace_root().join("ok.txt").exists());
        assert!(!tmp.path().join("backups").exists());
        assert!(
            res.operations
                .iter()
                .all(|o| o.status == OutcomeStatus::Skipped)
        );
    }

    #[test]
    fn delete_is_idempotent()
    {
        let tmp = TempDir::new().unwrap();
        let eng = engine(&tmp);
        fs::write(eng.workspace_root().join("d.txt"), "bye").unwrap();

        let ops = [FileOperation::delete("d.txt")];
        assert!(eng.apply(&ops).is_success());
        let again = eng.apply(&ops);
        assert!(again.is_success());
        assert_eq!(again.success_count, 1);
        assert!(again.backup_id.is_none());
    }

    #[test]
    fn failures_do_not_stop_the_batch()
    {
        let tmp = TempDir::new().unwrap();
        let eng = engine(&tmp);
        let ops = vec![
            FileOperation::partial_update("missing.txt", 1, 1, "x"),
            FileOperation::create("nested/dir/new.txt", "hello"),
        ];

        let res = eng.apply(&ops);
        assert_eq!(res.failure_count, 1);
        assert_eq!(res.success_count, 1);
        assert_eq!(res.operations[0].status, OutcomeStatus::Failed);
        assert_eq!(
            fs::read_to_string(eng.workspace_root().join("nested/dir/new.txt")).unwrap(),
            "hello"
        );
    }

    #[test]
    fn directory_creation_can_be_disabled()
    {
        let tmp = TempDir::new().unwrap();
        let eng = engine(&tmp).with_create_directories(false);
        let res = eng.apply(&[FileOperation::create("sub/x.txt", "x")]);
        assert_eq!(res.failure_count, 1);
        assert!(res.errors[0].contains("directory creation is disabled"));
    }

    #[test]
    fn rename_moves_and_backs_up_source()
    {
        let tmp = TempDir::new().unwrap();
        let eng = engine(&tmp);
        fs::write(eng.workspace_root().join("old.rs"), "fn a() {}").unwrap();

        let res = eng.apply(&[FileOperation::rename("old.rs", "moved/new.rs")]);
        assert!(res.is_success(), "{:?}", res.errors);
        assert!(!eng.workspace_root().join("old.rs").exists());
        assert!(eng.workspace_root().join("moved/new.rs").exists());

        let id = res.backup_id.unwrap();
        let manifest = eng.backups().read_manifest(&id).unwrap();
        assert_eq!(manifest.files[0].original_path, "old.rs");
    }

    #[test]
    fn cancelled_batch_skips_remaining_operations()
    {
        let tmp = TempDir::new().unwrap();
        let eng = engine(&tmp);
        eng.cancel_token()
            .cancel();

        let res = eng.apply(&[FileOperation::create("a.txt", "a")]);
        assert!(res.cancelled);
        assert!(!res.is_success());
        assert_eq!(res.operations[0].status, OutcomeStatus::Skipped);
        assert!(!eng.workspace_root().join("a.txt").exists());
    }

    #[test]
    fn cancelling_mid_batch_keeps_finished_work_and_backup()
    {
        let tmp = TempDir::new().unwrap();
        let eng = engine(&tmp);
        let root = eng
            .workspace_root()
            .to_path_buf();
        fs::write(root.join("a.txt"), "a0").unwrap();
        fs::write(root.join("c.txt"), "c0").unwrap();

        let ops = [
            FileOperation::update("a.txt", "a1"),
            FileOperation::create("b.txt", "b"),
            FileOperation::delete("c.txt"),
        ];
        let token = eng
            .cancel_token()
            .clone();
        let mut seen = 0;
        let res = eng.apply_with_progress(&ops, |_| {
            seen += 1;
            token.cancel();
        });

        assert_eq!(seen, 3);
        assert!(res.cancelled);
        let statuses: Vec<_> = res
            .operations
            .iter()
            .map(|o| o.status)
            .collect();
        assert_eq!(
            statuses,
            [OutcomeStatus::Applied, OutcomeStatus::Skipped, OutcomeStatus::Skipped]
        );
        assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "a1");
        assert!(!root.join("b.txt").exists());
        assert!(root.join("c.txt").exists());

        // Nothing is rolled back; the backup is the recovery path
        let id = res
            .backup_id
            .unwrap();
        eng.backups()
            .restore_backup(&id)
            .unwrap();
        assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "a0");
    }

    #[test]
    fn preview_reports_diffs_conflicts_and_counts()
    {
        let tmp = TempDir::new().unwrap();
        let eng = engine(&tmp);
        let root = eng.workspace_root();
        fs::write(root.join("a.txt"), "one\ntwo\n").unwrap();

        let ops = vec![
            FileOperation::update("a.txt", "one\n2\n"),
            FileOperation::create("a.txt", "x"),
            FileOperation::delete("ghost.txt"),
            FileOperation::rename("a.txt", "b.txt"),
        ];
        let p = eng.preview(&ops);
        assert_eq!((p.created, p.updated, p.deleted, p.renamed), (1, 1, 1, 1));
        assert_eq!(p.conflicts.len(), 2);
        assert_eq!(p.files[0].diff.len(), 3);
        assert!(p.files[0].exists);
        assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "one\ntwo\n");
        assert_eq!(p.conflicts, eng.check_conflicts(&ops));
    }
}
