//! Manifest-tracked backups of workspace files.
//!
//! Each backup lives under `<backup_root>/<ID>` with a `manifest.json` and
//! numbered copy files. Copies are staged in `<backup_root>/tmp/<ID>` and
//! renamed into place once the manifest is on disk, so a listed backup is
//! always complete.

use blake3::Hasher as Blake3;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

use crate::core::validate::validate_rel;
use crate::infra::io::write_atomic;

const MANIFEST: &str = "manifest.json";
const STAGING: &str = "tmp";

/// Backup and restore failures
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("backup not found: {0}")]
    NotFound(String),

    #[error("invalid manifest for backup {id}: {source}")]
    Manifest {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

fn io_err(context: impl Into<String>) -> impl FnOnce(io::Error) -> BackupError {
    let context = context.into();
    move |source| BackupError::Io { context, source }
}

/// One snapshotted file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub original_path: String,    // workspace-relative, '/' separated
    pub backup_file_name: String, // numbered copy inside the backup dir
    pub size_bytes: u64,
    pub checksum: String, // blake3:<hex>
}

/// Durable record of one `create_backup` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub files: Vec<BackupEntry>,
}

/// Listing row
#[derive(Debug, Clone, Serialize)]
pub struct BackupSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub files: usize,
    pub sample_paths: Vec<String>, // first 3 files for quick scanning
}

/// Outcome of a restore
#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreReport {
    pub id: String,
    pub restored: Vec<String>,
    /// Copies whose digest no longer matches the manifest; left untouched
    pub corrupt: Vec<String>,
    /// (path, error) pairs for writes that failed
    pub failed: Vec<(String, String)>,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.corrupt.is_empty() && self.failed.is_empty()
    }
}

/// Snapshots files of one workspace into an injected backup root
#[derive(Debug, Clone)]
pub struct BackupService {
    workspace_root: PathBuf,
    backup_root: PathBuf,
}

impl BackupService {
    pub fn new(workspace_root: impl Into<PathBuf>, backup_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            backup_root: backup_root.into(),
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Directory holding a finished backup.
    pub fn backup_dir(&self, id: &str) -> PathBuf {
        self.backup_root.join(id)
    }

    /// Snapshot every existing path; missing paths are skipped silently.
    #[instrument(skip(self, paths), fields(count = paths.len()))]
    pub fn create_backup<S: AsRef<str>>(&self, paths: &[S]) -> Result<String, BackupError> {
        let id = generate_backup_id();
        let staging = self.backup_root.join(STAGING).join(&id);
        fs::create_dir_all(&staging)
            .map_err(io_err(format!("create staging dir {}", staging.display())))?;

        let mut manifest = BackupManifest {
            id: id.clone(),
            created_at: Utc::now(),
            files: Vec::new(),
        };

        for raw in paths {
            let raw = raw.as_ref();
            let rel = match validate_rel(raw) {
                Ok(rel) => rel,
                Err(e) => {
                    warn!(path = raw, error = %e, "skipping unsafe backup path");
                    continue;
                }
            };
            let source = self.workspace_root.join(&rel);
            if !source.is_file() {
                debug!(path = raw, "not present, nothing to back up");
                continue;
            }

            let index = manifest.files.len() + 1;
            match copy_into(&source, &staging, index) {
                Ok((backup_file_name, size_bytes, checksum)) => {
                    manifest.files.push(BackupEntry {
                        original_path: to_slash(&rel),
                        backup_file_name,
                        size_bytes,
                        checksum,
                    });
                }
                // Best-effort: a file we cannot read must not block the apply
                Err(e) => warn!(path = raw, error = %e, "backup copy failed; skipped"),
            }
        }

        let text = serde_json::to_string_pretty(&manifest).map_err(|source| {
            BackupError::Manifest {
                id: id.clone(),
                source,
            }
        })?;
        let manifest_path = staging.join(MANIFEST);
        write_atomic(&manifest_path, text.as_bytes())
            .map_err(io_err(format!("write manifest {}", manifest_path.display())))?;
        let _ = sync_dir(&staging);

        let final_dir = self.backup_dir(&id);
        fs::rename(&staging, &final_dir).map_err(io_err(format!(
            "rename {} → {}",
            staging.display(),
            final_dir.display()
        )))?;
        let _ = sync_dir(&self.backup_root);

        info!(id = %id, files = manifest.files.len(), "backup created");
        Ok(id)
    }

    /// Load a finished backup's manifest.
    pub fn read_manifest(&self, id: &str) -> Result<BackupManifest, BackupError> {
        if !is_valid_id(id) {
            return Err(BackupError::NotFound(id.to_string()));
        }
        let path = self.backup_dir(id).join(MANIFEST);
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BackupError::NotFound(id.to_string()));
            }
            Err(e) => return Err(io_err(format!("read manifest {}", path.display()))(e)),
        };
        serde_json::from_str(&text).map_err(|source| BackupError::Manifest {
            id: id.to_string(),
            source,
        })
    }

    /// Write every snapshot back over its original path.
    ///
    /// Files that did not exist when the backup was taken are left alone.
    #[instrument(skip(self))]
    pub fn restore_backup(&self, id: &str) -> Result<RestoreReport, BackupError> {
        let manifest = self.read_manifest(id)?;
        let dir = self.backup_dir(id);
        let mut report = RestoreReport {
            id: id.to_string(),
            ..RestoreReport::default()
        };

        for entry in &manifest.files {
            let copy = dir.join(&entry.backup_file_name);
            let bytes = match fs::read(&copy) {
                Ok(b) => b,
                Err(e) => {
                    report
                        .failed
                        .push((entry.original_path.clone(), e.to_string()));
                    continue;
                }
            };
            if digest(&bytes) != entry.checksum {
                warn!(path = %entry.original_path, "backup copy checksum mismatch");
                report.corrupt.push(entry.original_path.clone());
                continue;
            }

            let target = match validate_rel(&entry.original_path) {
                Ok(rel) => self.workspace_root.join(rel),
                Err(e) => {
                    report
                        .failed
                        .push((entry.original_path.clone(), e.to_string()));
                    continue;
                }
            };
            if let Some(parent) = target.parent()
                && let Err(e) = fs::create_dir_all(parent)
            {
                report
                    .failed
                    .push((entry.original_path.clone(), e.to_string()));
                continue;
            }
            match write_atomic(&target, &bytes) {
                Ok(()) => report.restored.push(entry.original_path.clone()),
                Err(e) => report
                    .failed
                    .push((entry.original_path.clone(), e.to_string())),
            }
        }

        info!(
            id,
            restored = report.restored.len(),
            corrupt = report.corrupt.len(),
            failed = report.failed.len(),
            "backup restored"
        );
        Ok(report)
    }

    /// Remove a backup directory. Returns false if it did not exist.
    pub fn delete_backup(&self, id: &str) -> Result<bool, BackupError> {
        if !is_valid_id(id) {
            return Ok(false);
        }
        let dir = self.backup_dir(id);
        if !dir.join(MANIFEST).exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir).map_err(io_err(format!("remove {}", dir.display())))?;
        Ok(true)
    }

    /// Finished backups, newest first. Unreadable manifests are skipped.
    pub fn list_backups(&self) -> Result<Vec<BackupSummary>, BackupError> {
        let rd = match fs::read_dir(&self.backup_root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(io_err(format!("read {}", self.backup_root.display()))(e));
            }
        };

        let mut out = Vec::new();
        for entry in rd {
            let entry = entry.map_err(io_err("read backup root entry"))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name == STAGING || !entry.path().is_dir() {
                continue;
            }
            match self.read_manifest(&name) {
                Ok(m) => out.push(BackupSummary {
                    id: m.id,
                    created_at: m.created_at,
                    files: m.files.len(),
                    sample_paths: m
                        .files
                        .iter()
                        .take(3)
                        .map(|f| f.original_path.clone())
                        .collect(),
                }),
                Err(e) => debug!(dir = %name, error = %e, "ignoring non-backup directory"),
            }
        }

        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(out)
    }

    /// Keep the newest `keep_latest` backups and delete the rest.
    pub fn prune_backups(&self, keep_latest: usize) -> Result<Vec<String>, BackupError> {
        let mut removed = Vec::new();
        for b in self.list_backups()?.into_iter().skip(keep_latest) {
            if self.delete_backup(&b.id)? {
                removed.push(b.id);
            }
        }
        Ok(removed)
    }
}

/// Copy one file into the staging dir as `<NNNN>_<name>`.
fn copy_into(source: &Path, staging: &Path, index: usize) -> io::Result<(String, u64, String)> {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let backup_file_name = format!("{index:04}_{name}");
    let dest = staging.join(&backup_file_name);

    let size_bytes = fs::copy(source, &dest)?;
    let checksum = stream_blake3(&dest)?;
    Ok((backup_file_name, size_bytes, checksum))
}

/// `yyyyMMdd-HHmmss-<32 hex>`; sortable by creation time
fn generate_backup_id() -> String {
    let ts = Utc::now().format("%Y%m%d-%H%M%S");
    let token: u128 = rand::rng().random();
    format!("{ts}-{token:032x}")
}

/// Ids are plain tokens; anything path-like is refused.
fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id != STAGING
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn to_slash(p: &Path) -> String {
    p.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn digest(bytes: &[u8]) -> String {
    format!("blake3:{}", blake3::hash(bytes).to_hex())
}

/// Stream a file into a blake3 digest as `blake3:<hex>`.
fn stream_blake3(path: &Path) -> io::Result<String> {
    let mut f = File::open(path)?;
    let mut hasher = Blake3::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Cross-platform directory fsync helper.
#[cfg(unix)]
fn sync_dir(p: &Path) -> io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let f = fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY)
        .open(p)?;
    f.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_p: &Path) -> io::Result<()> {
    // No reliable directory fsync; best-effort no-op.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn service(tmp: &TempDir) -> BackupService {
        let ws = tmp.path().join("ws");
        fs::create_dir_all(&ws).unwrap();
        BackupService::new(ws, tmp.path().join("backups"))
    }

    #[test]
    fn id_has_timestamp_and_token() {
        let id = generate_backup_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
        assert_eq!(parts[2].len(), 32);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn missing_paths_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let svc = service(&tmp);
        fs::write(svc.workspace_root().join("a.txt"), "hello").unwrap();

        let id = svc.create_backup(&["a.txt", "nope.txt"]).unwrap();
        let m = svc.read_manifest(&id).unwrap();
        assert_eq!(m.files.len(), 1);
        assert_eq!(m.files[0].original_path, "a.txt");
        assert_eq!(m.files[0].backup_file_name, "0001_a.txt");
        assert!(svc.backup_dir(&id).join("0001_a.txt").exists());
        assert!(!svc.backup_root().join(STAGING).join(&id).exists());
    }

    #[test]
    fn restore_of_unknown_id_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let svc = service(&tmp);
        assert!(matches!(
            svc.restore_backup("20250101-000000-deadbeef"),
            Err(BackupError::NotFound(_))
        ));
        assert!(matches!(
            svc.restore_backup("../../etc"),
            Err(BackupError::NotFound(_))
        ));
    }

    #[test]
    fn corrupt_manifest_is_reported() {
        let tmp = TempDir::new().unwrap();
        let svc = service(&tmp);
        let id = svc.create_backup::<&str>(&[]).unwrap();
        fs::write(svc.backup_dir(&id).join(MANIFEST), "{not json").unwrap();
        assert!(matches!(
            svc.restore_backup(&id),
            Err(BackupError::Manifest { .. })
        ));
    }

    #[test]
    fn tampered_copy_is_not_restored() {
        let tmp = TempDir::new().unwrap();
        let svc = service(&tmp);
        let file = svc.workspace_root().join("a.txt");
        fs::write(&file, "v1").unwrap();
        let id = svc.create_backup(&["a.txt"]).unwrap();

        fs::write(svc.backup_dir(&id).join("0001_a.txt"), "evil").unwrap();
        fs::write(&file, "v2").unwrap();

        let report = svc.restore_backup(&id).unwrap();
        assert_eq!(report.corrupt, vec!["a.txt".to_string()]);
        assert!(!report.is_complete());
        assert_eq!(fs::read_to_string(&file).unwrap(), "v2");
    }

    #[test]
    fn prune_keeps_newest() {
        let tmp = TempDir::new().unwrap();
        let svc = service(&tmp);
        let ids: Vec<String> = (0..3)
            .map(|_| svc.create_backup::<&str>(&[]).unwrap())
            .collect();
        assert_eq!(svc.list_backups().unwrap().len(), 3);

        let removed = svc.prune_backups(1).unwrap();
        assert_eq!(removed.len(), 2);
        let left = svc.list_backups().unwrap();
        assert_eq!(left.len(), 1);
        assert!(ids.contains(&left[0].id));
        assert!(!svc.delete_backup("missing").unwrap());
    }
}
