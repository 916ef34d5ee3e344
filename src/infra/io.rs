use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Newline convention of a text file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    /// First newline decides; files without one default to LF.
    pub fn detect(s: &str) -> Self {
        match s.find('\n') {
            Some(i) if i > 0 && s.as_bytes()[i - 1] == b'\r' => LineEnding::CrLf,
            _ => LineEnding::Lf,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

/// Line list plus what is needed to write it back in the same shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLines {
    pub lines: Vec<String>,
    pub ending: LineEnding,
    pub trailing_newline: bool,
}

impl TextLines {
    pub fn parse(content: &str) -> Self {
        Self {
            lines: content
                .lines()
                .map(|l| l.trim_end_matches('\r').to_string())
                .collect(),
            ending: LineEnding::detect(content),
            trailing_newline: content.ends_with('\n'),
        }
    }

    pub fn render(&self) -> String {
        let nl = self.ending.as_str();
        let mut out = self.lines.join(nl);
        if self.trailing_newline && !self.lines.is_empty() {
            out.push_str(nl);
        }
        out
    }
}

/// Atomic write with robust temp file strategy
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    // Prefer same-dir tempfile so persist() is a rename
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    // Preserve original permissions when overwriting
    let perms = fs::metadata(path).map(|m| m.permissions()).ok();

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;

    if let Some(perms) = perms {
        fs::set_permissions(tmp.path(), perms)?;
    }

    // Atomically replace the destination
    if let Err(e) = tmp.persist(path) {
        // Rename refused (e.g. Windows sharing rules): copy the bytes instead
        fs::copy(e.file.path(), path)?;
    }

    // fsync parent dir to ensure durability on Unix
    #[cfg(unix)]
    {
        if let Ok(parent_file) = fs::File::open(dir) {
            let _ = parent_file.sync_all();
        }
    }

    Ok(())
}
