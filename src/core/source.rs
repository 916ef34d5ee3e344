//! Where model responses come from and how their text is masked
//!
//! `Sanitizer` lets a caller redact sensitive values before text leaves the
//! machine and put them back once a response arrives. The engine only ever
//! sees the desanitized text.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Reversible masking of outgoing and incoming text
pub trait Sanitizer {
    fn sanitize(&self, text: &str) -> String;
    fn desanitize(&self, text: &str) -> String;
}

/// Identity sanitizer
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Sanitizer for Passthrough {
    fn sanitize(&self, text: &str) -> String {
        text.to_string()
    }

    fn desanitize(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Provider of raw response text
pub trait TextSource {
    /// Short label for logs and error messages
    fn name(&self) -> String;
    fn read_text(&mut self) -> Result<String>;
}

/// System clipboard via arboard
#[derive(Debug, Default)]
pub struct ClipboardSource;

impl TextSource for ClipboardSource {
    fn name(&self) -> String {
        "clipboard".into()
    }

    fn read_text(&mut self) -> Result<String> {
        let mut clipboard = arboard::Clipboard::new().context("Failed to access clipboard")?;
        clipboard
            .get_text()
            .context("Failed to get text from clipboard")
    }
}

#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TextSource for FileSource {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn read_text(&mut self) -> Result<String> {
        std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))
    }
}

#[derive(Debug, Default)]
pub struct StdinSource;

impl TextSource for StdinSource {
    fn name(&self) -> String {
        "stdin".into()
    }

    fn read_text(&mut self) -> Result<String> {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        Ok(buf)
    }
}

/// Read from `source` and undo any masking.
pub fn read_response(source: &mut dyn TextSource, sanitizer: &dyn Sanitizer) -> Result<String> {
    let raw = source.read_text()?;
    tracing::debug!(source = %source.name(), bytes = raw.len(), "response read");
    Ok(sanitizer.desanitize(&raw))
}
