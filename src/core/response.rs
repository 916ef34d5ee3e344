//! Extraction of file updates from raw model output
//!
//! Two accepted shapes:
//! - the `<code_changes>` XML contract with one `<changed_file>` per file
//! - fenced code blocks, attributed to a path by a nearby header marker, an
//!   in-block `File:` comment, position, or a synthetic name (in that order)
//!
//! Parsing never fails: anything ambiguous becomes a warning next to a
//! best-effort guess. Input is capped and every regex is built with a size
//! limit; the `regex` crate matches in linear time, so adversarial text cannot
//! stall the parser.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use indexmap::IndexMap;
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::core::ops::{FileUpdate, ParseResult, UpdateKind};

/// Phrases that mark a block as a brand-new file
const NEW_FILE_PHRASES: &[&str] = &[
    "new file",
    "create file",
    "create a file",
    "create a new",
    "creating a new",
    "add a new file",
    "newly created",
];

/// Tunables for the heuristics
#[derive(Debug, Clone)]
pub struct ParserOptions {
    /// Characters (not bytes) before a block searched for a header marker
    pub header_window: usize,
    /// Characters (not bytes) either side of a block start searched for
    /// new-file phrases
    pub new_file_window: usize,
    /// Input beyond this many bytes is ignored
    pub max_input_bytes: usize,
    /// Compiled-size budget per regex
    pub regex_size_limit: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            header_window: 500,
            new_file_window: 200,
            max_input_bytes: 4 * 1024 * 1024,
            regex_size_limit: 1024 * 1024,
        }
    }
}

/// Parser construction errors
#[derive(Debug, thiserror::Error)]
pub enum ParserBuildError {
    #[error("pattern exceeds configured limits: {0}")]
    Regex(#[from] regex::Error),

    #[error("phrase matcher: {0}")]
    Phrases(#[from] aho_corasick::BuildError),
}

/// One fenced block with byte offsets into the normalized text
#[derive(Debug)]
struct CodeBlock<'a> {
    start: usize,
    end: usize,
    lang: &'a str,
    body: &'a str,
}

/// Compiled patterns; build once and reuse across responses
#[derive(Debug)]
pub struct ResponseParser {
    opts: ParserOptions,
    fence: Regex,
    file_label: Regex,
    bold: Regex,
    backtick: Regex,
    heading: Regex,
    in_block: Regex,
    changed_file: Regex,
    xml_path: Regex,
    xml_summary: Regex,
    xml_operation: Regex,
    xml_cdata: Regex,
    xml_code: Regex,
    new_file: AhoCorasick,
}

impl ResponseParser {
    pub fn new(opts: ParserOptions) -> Result<Self, ParserBuildError> {
        let limit = opts.regex_size_limit;
        let build = |p: &str| {
            RegexBuilder::new(p)
                .size_limit(limit)
                .dfa_size_limit(limit)
                .build()
        };

        Ok(Self {
            fence: build(r"(?ms)^[ \t]*```([\w+#.\-]*)[^\n]*\n(.*?)^[ \t]*```[ \t]*$")?,
            file_label: build(r#"(?i)\b(?:file(?:name)?|path)\s*:\s*[`*"']*([^\s`*"']+)"#)?,
            bold: build(r"\*\*([^*\n]+?)\*\*")?,
            backtick: build(r"`([^`\n]+)`")?,
            heading: build(r"^\s*#{1,6}\s+(.+?)\s*$")?,
            in_block: build(
                r"(?i)^\s*(?://+|#+|--|;+|/\*+|<!--)\s*(?:file(?:name)?|path)\s*:\s*(\S+?)\s*(?:\*/|-->)?\s*$",
            )?,
            changed_file: build(r"(?s)<changed_file>(.*?)</changed_file>")?,
            xml_path: build(r"(?s)<file_path>(.*?)</file_path>")?,
            xml_summary: build(r"(?s)<file_summary>(.*?)</file_summary>")?,
            xml_operation: build(r"(?s)<file_operation>(.*?)</file_operation>")?,
            xml_cdata: build(r"(?s)<file_code>\s*<!\[CDATA\[(.*?)\]\]>\s*</file_code>")?,
            xml_code: build(r"(?s)<file_code>(.*?)</file_code>")?,
            new_file: AhoCorasickBuilder::new()
                .ascii_case_insensitive(true)
                .build(NEW_FILE_PHRASES)?,
            opts,
        })
    }

    pub fn options(&self) -> &ParserOptions {
        &self.opts
    }

    /// Extract updates from `raw`, attributing blocks against `original_files`.
    pub fn parse<S: AsRef<str>>(&self, raw: &str, original_files: &[S]) -> ParseResult {
        let mut result = ParseResult::default();
        let text = self.prepare(raw, &mut result.warnings);

        if text.contains("<code_changes") {
            let mut by_path = IndexMap::new();
            self.parse_xml(&text, &mut by_path, &mut result.warnings);
            if !by_path.is_empty() {
                result.updates = by_path.into_values().collect();
                return result;
            }
            result
                .warnings
                .push("<code_changes> had no usable <changed_file> entries; trying code blocks".into());
        }

        let blocks = self.extract_blocks(&text);
        if blocks.is_empty() {
            result
                .warnings
                .push("No code blocks or <code_changes> section found in response".into());
            return result;
        }

        let originals: Vec<String> = original_files
            .iter()
            .map(|p| normalize_path(p.as_ref()))
            .collect();

        let mut by_path: IndexMap<String, FileUpdate> = IndexMap::new();
        let mut positional = 0usize;
        let mut prev_end = 0usize;

        for (n, block) in blocks.iter().enumerate() {
            let window_start =
                chars_back(&text, block.start, self.opts.header_window).max(prev_end);
            prev_end = block.end;

            let mut content = block.body.to_string();
            let path = if let Some(p) = self.header_before(&text[window_start..block.start]) {
                p
            } else if let Some((p, rest)) = self.header_inside(block.body) {
                content = rest;
                p
            } else if let Some(p) = originals.get(positional) {
                positional += 1;
                debug!(block = n + 1, path = %p, "attributed by position");
                p.clone()
            } else {
                positional += 1;
                let name = format!("UpdatedFile{}.{}", n + 1, extension_for(block.lang));
                result.warnings.push(format!(
                    "Could not determine file path for code block {}; using {}",
                    n + 1,
                    name
                ));
                name
            };

            let around = {
                let lo = chars_back(&text, block.start, self.opts.new_file_window);
                let hi = chars_ahead(&text, block.start, self.opts.new_file_window);
                &text[lo..hi]
            };
            let path = normalize_path(&path);
            let kind = if !originals.contains(&path) || self.new_file.is_match(around) {
                UpdateKind::Create
            } else {
                UpdateKind::Update
            };

            let update = FileUpdate {
                estimated_lines_changed: count_non_empty(&content),
                summary: format!("Code block {}", n + 1),
                path,
                content,
                kind,
            };
            push_update(&mut by_path, update, &mut result.warnings);
        }

        result.updates = by_path.into_values().collect();
        result
    }

    /// Normalize line endings and enforce the input budget.
    fn prepare(&self, raw: &str, warnings: &mut Vec<String>) -> String {
        let capped = if raw.len() > self.opts.max_input_bytes {
            let cut = floor_boundary(raw, self.opts.max_input_bytes);
            warn!(len = raw.len(), cut, "response exceeds input budget");
            warnings.push(format!(
                "Response truncated to {} of {} bytes before parsing",
                cut,
                raw.len()
            ));
            &raw[..cut]
        } else {
            raw
        };
        capped.replace("\r\n", "\n")
    }

    fn extract_blocks<'t>(&self, text: &'t str) -> Vec<CodeBlock<'t>> {
        self.fence
            .captures_iter(text)
            .filter_map(|cap| {
                let whole = cap.get(0)?;
                let body = cap.get(2).map(|m| m.as_str()).unwrap_or("");
                Some(CodeBlock {
                    start: whole.start(),
                    end: whole.end(),
                    lang: cap.get(1).map(|m| m.as_str()).unwrap_or(""),
                    body,
                })
            })
            .collect()
    }

    /// Nearest header marker in the text preceding a block.
    fn header_before(&self, window: &str) -> Option<String> {
        for line in window.lines().rev() {
            if line.trim().is_empty() {
                continue;
            }
            let labelled = self
                .file_label
                .captures_iter(line)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str())
                .filter(|s| looks_like_path(s))
                .last();
            let bold = || {
                self.bold
                    .captures_iter(line)
                    .filter_map(|c| c.get(1))
                    .filter_map(|m| path_token(m.as_str()))
                    .last()
            };
            let quoted = || {
                self.backtick
                    .captures_iter(line)
                    .filter_map(|c| c.get(1))
                    .map(|m| m.as_str())
                    .filter(|s| looks_like_path(s))
                    .last()
                    .map(str::to_string)
            };
            let heading = || {
                self.heading
                    .captures(line)
                    .and_then(|c| c.get(1))
                    .and_then(|m| path_token(m.as_str()))
            };

            let found = labelled
                .map(clean_token)
                .or_else(bold)
                .or_else(quoted)
                .or_else(heading);
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// `// File: x` style first line inside a block; returns path and the rest.
    fn header_inside(&self, body: &str) -> Option<(String, String)> {
        let mut offset = 0usize;
        for line in body.split_inclusive('\n') {
            if line.trim().is_empty() {
                offset += line.len();
                continue;
            }
            let cap = self.in_block.captures(line.trim_end_matches('\n'))?;
            let path = clean_token(cap.get(1)?.as_str());
            if !looks_like_path(&path) {
                return None;
            }
            let rest = &body[offset + line.len()..];
            return Some((path, rest.to_string()));
        }
        None
    }

    fn parse_xml(
        &self,
        text: &str,
        by_path: &mut IndexMap<String, FileUpdate>,
        warnings: &mut Vec<String>,
    ) {
        for (i, cap) in self.changed_file.captures_iter(text).enumerate() {
            let Some(body) = cap.get(1).map(|m| m.as_str()) else {
                continue;
            };
            let n = i + 1;

            let path = tag_text(&self.xml_path, body)
                .map(|s| normalize_path(unescape_xml(s.trim()).trim()))
                .unwrap_or_default();
            if path.is_empty() {
                warnings.push(format!("changed_file #{n} has no <file_path>; skipped"));
                continue;
            }

            let op = tag_text(&self.xml_operation, body)
                .map(|s| s.trim().to_ascii_uppercase())
                .unwrap_or_default();
            let kind = match op.as_str() {
                "CREATE" => UpdateKind::Create,
                "UPDATE" => UpdateKind::Update,
                "DELETE" => UpdateKind::Delete,
                other => {
                    warnings.push(format!(
                        "changed_file {path}: unknown operation {other:?}; skipped"
                    ));
                    continue;
                }
            };

            let summary = tag_text(&self.xml_summary, body)
                .map(|s| unescape_xml(s.trim()))
                .unwrap_or_default();

            let content = if kind == UpdateKind::Delete {
                String::new()
            } else if let Some(code) = tag_text(&self.xml_cdata, body) {
                tidy_code(code)
            } else if let Some(code) = tag_text(&self.xml_code, body) {
                tidy_code(&unescape_xml(code))
            } else {
                warnings.push(format!("changed_file {path}: {op} without <file_code>; skipped"));
                continue;
            };

            let update = FileUpdate {
                estimated_lines_changed: count_non_empty(&content),
                path,
                content,
                kind,
                summary,
            };
            push_update(by_path, update, warnings);
        }
    }
}

/// Later blocks for the same path replace earlier ones.
fn push_update(
    by_path: &mut IndexMap<String, FileUpdate>,
    update: FileUpdate,
    warnings: &mut Vec<String>,
) {
    if by_path.contains_key(&update.path) {
        warnings.push(format!(
            "Multiple changes for {}; keeping the last one",
            update.path
        ));
    }
    by_path.insert(update.path.clone(), update);
}

fn tag_text<'a>(re: &Regex, body: &'a str) -> Option<&'a str> {
    re.captures(body).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Drop the newline after the opening tag and indentation before the closing one.
fn tidy_code(code: &str) -> String {
    let code = code.strip_prefix('\n').unwrap_or(code);
    match code.rfind('\n') {
        Some(i) if code[i + 1..].trim().is_empty() => code[..=i].to_string(),
        _ => code.to_string(),
    }
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn count_non_empty(content: &str) -> usize {
    content.lines().filter(|l| !l.trim().is_empty()).count()
}

/// Forward slashes, no leading `./`
fn normalize_path(p: &str) -> String {
    let s = p.trim().replace('\\', "/");
    let mut s = s.as_str();
    while let Some(rest) = s.strip_prefix("./") {
        s = rest;
    }
    s.to_string()
}

fn clean_token(s: &str) -> String {
    s.trim()
        .trim_matches(|c| matches!(c, '`' | '"' | '\'' | '*' | ':' | ',' | '(' | ')'))
        .to_string()
}

/// Last whitespace-separated token of `s` that looks like a file path
fn path_token(s: &str) -> Option<String> {
    s.split_whitespace()
        .rev()
        .map(clean_token)
        .find(|t| looks_like_path(t))
}

/// Heuristic: no spaces or code punctuation, and either a directory part or
/// a short alphanumeric extension.
fn looks_like_path(s: &str) -> bool {
    let raw = s.trim();
    if raw.chars().any(|c| {
        c.is_whitespace()
            || matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | '<' | '>' | '=' | ';' | '"')
    }) {
        return false;
    }
    let s = clean_token(raw);
    if s.is_empty() || s.len() > 260 || s.contains("://") {
        return false;
    }
    let normalized = s.replace('\\', "/");
    let name = normalized.rsplit('/').next().unwrap_or("");
    match name.rsplit_once('.') {
        Some((stem, ext)) => {
            (!stem.is_empty() || normalized.contains('/'))
                && (1..=8).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}

/// File extension for a fence language tag
fn extension_for(lang: &str) -> &'static str {
    match lang.to_ascii_lowercase().as_str() {
        "rust" | "rs" => "rs",
        "python" | "py" => "py",
        "javascript" | "js" | "jsx" => "js",
        "typescript" | "ts" | "tsx" => "ts",
        "csharp" | "cs" | "c#" => "cs",
        "java" => "java",
        "kotlin" | "kt" => "kt",
        "go" | "golang" => "go",
        "cpp" | "c++" | "cxx" => "cpp",
        "c" => "c",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "html" => "html",
        "css" => "css",
        "bash" | "sh" | "shell" | "zsh" => "sh",
        "markdown" | "md" => "md",
        "xml" => "xml",
        "sql" => "sql",
        _ => "txt",
    }
}

/// Largest char boundary ≤ `idx`
/// Byte offset `n` characters before `idx` (clamped to the start).
fn chars_back(s: &str, idx: usize, n: usize) -> usize {
    if n == 0 {
        return idx;
    }
    s[..idx]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map_or(0, |(i, _)| i)
}

/// Byte offset `n` characters after `idx` (clamped to the end).
fn chars_ahead(s: &str, idx: usize, n: usize) -> usize {
    s[idx..]
        .char_indices()
        .nth(n)
        .map_or(s.len(), |(i, _)| idx + i)
}

fn floor_boundary(s: &str, idx: usize) -> usize {
    let mut i = idx.min(s.len());
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
