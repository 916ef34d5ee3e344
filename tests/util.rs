//! Shared helpers for integration tests
//!
//! A workspace lives in `<tmp>/ws` and its backups in `<tmp>/backups`, so
//! assertions about the workspace never see backup files.

#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use editx::{ApplyEngine, BackupService};
use tempfile::TempDir;

pub struct Fixture
{
    pub tmp: TempDir,
    pub ws: PathBuf,
    pub backups: PathBuf,
}

impl Fixture
{
    pub fn new() -> Self
    {
        let tmp = tempfile::tempdir().unwrap();
        let ws = tmp
            .path()
            .join("ws");
        let backups = tmp
            .path()
            .join("backups");
        fs::create_dir_all(&ws).unwrap();
        Self { tmp, ws, backups }
    }

    pub fn service(&self) -> BackupService
    {
        BackupService::new(&self.ws, &self.backups)
    }

    pub fn engine(&self) -> ApplyEngine
    {
        ApplyEngine::new(self.service())
    }

    pub fn write(
        &self,
        rel: &str,
        body: &str,
    )
    {
        write_file(&self.ws, rel, body);
    }

    pub fn read(
        &self,
        rel: &str,
    ) -> String
    {
        read_file(&self.ws, rel)
    }

    pub fn exists(
        &self,
        rel: &str,
    ) -> bool
    {
        self.ws
            .join(rel)
            .exists()
    }
}

/// Create a text file under `root`, including parents.
pub fn write_file(
    root: &Path,
    rel: &str,
    body: &str,
)
{
    let p = root.join(rel);
    if let Some(parent) = p.parent()
    {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(p, body.as_bytes()).unwrap();
}

/// Read a file as UTF-8 string.
pub fn read_file(
    root: &Path,
    rel: &str,
) -> String
{
    fs::read_to_string(root.join(rel)).unwrap()
}
