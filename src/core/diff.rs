//! Line-level diff via a longest-common-subsequence table.
//!
//! O(n·m) time and space; intended for previewing single-file edits, not for
//! large generated files.

use owo_colors::OwoColorize;
use serde::Serialize;

/// Classification of one diff line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffLineKind {
    Context,
    Added,
    Removed,
    Modified,
}

/// One line of a computed diff with its 1-based positions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffLine {
    pub kind: DiffLineKind,
    pub old_line: Option<usize>,
    pub new_line: Option<usize>,
    pub content: String,
}

impl DiffLine {
    fn context(old: usize, new: usize, content: &str) -> Self {
        Self {
            kind: DiffLineKind::Context,
            old_line: Some(old),
            new_line: Some(new),
            content: content.to_string(),
        }
    }

    fn added(new: usize, content: &str) -> Self {
        Self {
            kind: DiffLineKind::Added,
            old_line: None,
            new_line: Some(new),
            content: content.to_string(),
        }
    }

    fn removed(old: usize, content: &str) -> Self {
        Self {
            kind: DiffLineKind::Removed,
            old_line: Some(old),
            new_line: None,
            content: content.to_string(),
        }
    }

    /// Unified-diff prefix for this line
    pub fn prefix(&self) -> char {
        match self.kind {
            DiffLineKind::Context => ' ',
            DiffLineKind::Added => '+',
            DiffLineKind::Removed => '-',
            DiffLineKind::Modified => '~',
        }
    }
}

/// Summary counts over a diff
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffStats {
    pub added: usize,
    pub removed: usize,
    pub unchanged: usize,
}

/// Split into lines, dropping trailing '\r'. Empty text has zero lines.
fn split_lines(text: &str) -> Vec<&str> {
    text.lines().map(|l| l.trim_end_matches('\r')).collect()
}

/// Compute an ordered line diff from `original` to `modified`.
pub fn compute_diff(original: &str, modified: &str) -> Vec<DiffLine> {
    let a = split_lines(original);
    let b = split_lines(modified);
    let (n, m) = (a.len(), b.len());

    // lcs[i][j] = LCS length of a[..i] and b[..j], flattened row-major
    let width = m + 1;
    let mut lcs = vec![0usize; (n + 1) * width];
    for i in 1..=n {
        for j in 1..=m {
            lcs[i * width + j] = if a[i - 1] == b[j - 1] {
                lcs[(i - 1) * width + (j - 1)] + 1
            } else {
                lcs[(i - 1) * width + j].max(lcs[i * width + (j - 1)])
            };
        }
    }

    let mut out = Vec::with_capacity(n.max(m));
    let (mut i, mut j) = (n, m);
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && a[i - 1] == b[j - 1] {
            out.push(DiffLine::context(i, j, a[i - 1]));
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || lcs[i * width + (j - 1)] >= lcs[(i - 1) * width + j]) {
            // Ties resolve toward an addition
            out.push(DiffLine::added(j, b[j - 1]));
            j -= 1;
        } else {
            out.push(DiffLine::removed(i, a[i - 1]));
            i -= 1;
        }
    }

    out.reverse();
    out
}

/// Count added/removed/unchanged lines.
pub fn diff_stats(lines: &[DiffLine]) -> DiffStats {
    lines.iter().fold(DiffStats::default(), |mut s, l| {
        match l.kind {
            DiffLineKind::Added => s.added += 1,
            DiffLineKind::Removed => s.removed += 1,
            DiffLineKind::Modified => {
                s.added += 1;
                s.removed += 1;
            }
            DiffLineKind::Context => s.unchanged += 1,
        }
        s
    })
}

/// Render `--- a/path` / `+++ b/path` followed by every prefixed line.
pub fn generate_unified_diff(original: &str, modified: &str, path: &str) -> String {
    render_lines(&compute_diff(original, modified), path, false)
}

/// Render already-computed lines, optionally with ANSI colors.
pub fn render_lines(lines: &[DiffLine], path: &str, color: bool) -> String {
    let mut out = String::with_capacity(lines.len() * 40 + path.len() * 2 + 16);
    let header_old = format!("--- a/{path}");
    let header_new = format!("+++ b/{path}");
    if color {
        out.push_str(&header_old.bold().to_string());
        out.push('\n');
        out.push_str(&header_new.bold().to_string());
        out.push('\n');
    } else {
        out.push_str(&header_old);
        out.push('\n');
        out.push_str(&header_new);
        out.push('\n');
    }

    for line in lines {
        let text = format!("{}{}", line.prefix(), line.content);
        if color {
            let painted = match line.kind {
                DiffLineKind::Added => text.green().to_string(),
                DiffLineKind::Removed => text.red().to_string(),
                DiffLineKind::Modified => text.yellow().to_string(),
                DiffLineKind::Context => text,
            };
            out.push_str(&painted);
        } else {
            out.push_str(&text);
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn kinds(lines: &[DiffLine]) -> Vec<DiffLineKind> {
        lines.iter().map(|l| l.kind).collect()
    }

    #[test]
    fn empty_original_is_all_added() {
        let d = compute_diff("", "a\nb");
        assert_eq!(d.len(), 2);
        assert_eq!(d[0], DiffLine::added(1, "a"));
        assert_eq!(d[1], DiffLine::added(2, "b"));
    }

    #[test]
    fn empty_modified_is_all_removed() {
        let d = compute_diff("a\nb\n", "");
        assert_eq!(kinds(&d), vec![DiffLineKind::Removed, DiffLineKind::Removed]);
        assert_eq!(d[1].old_line, Some(2));
    }

    #[test]
    fn single_line_change_is_remove_then_add() {
        let d = compute_diff("line1\nline2\nline3", "line1\nline2 modified\nline3");
        assert_eq!(
            d,
            vec![
                DiffLine::context(1, 1, "line1"),
                DiffLine::removed(2, "line2"),
                DiffLine::added(2, "line2 modified"),
                DiffLine::context(3, 3, "line3"),
            ]
        );
    }

    #[test]
    fn carriage_returns_are_ignored() {
        let d = compute_diff("a\r\nb\r\n", "a\nb\n");
        assert!(d.iter().all(|l| l.kind == DiffLineKind::Context));
    }

    #[test]
    fn unified_diff_has_headers_and_prefixes() {
        let text = generate_unified_diff("keep\nold\n", "keep\nnew\n", "src/x.rs");
        assert_eq!(
            text,
            "--- a/src/x.rs\n+++ b/src/x.rs\n keep\n-old\n+new\n"
        );
    }

    #[test]
    fn stats_count_each_kind() {
        let d = compute_diff("a\nb\nc", "a\nc\nd\ne");
        let s = diff_stats(&d);
        assert_eq!(s, DiffStats { added: 2, removed: 1, unchanged: 2 });
    }

    proptest! {
        #[test]
        fn identical_inputs_are_all_context(lines in prop::collection::vec("[a-c]{0,3}", 0..12)) {
            let text = lines.join("\n");
            let d = compute_diff(&text, &text);
            prop_assert!(d.iter().all(|l| l.kind == DiffLineKind::Context));
        }

        #[test]
        fn filtering_reconstructs_both_sides(
            a in prop::collection::vec("[a-c]{1,2}", 0..10),
            b in prop::collection::vec("[a-c]{1,2}", 0..10),
        ) {
            let d = compute_diff(&a.join("\n"), &b.join("\n"));
            let old: Vec<&str> = d.iter()
                .filter(|l| l.kind != DiffLineKind::Added)
                .map(|l| l.content.as_str())
                .collect();
            let new: Vec<&str> = d.iter()
                .filter(|l| l.kind != DiffLineKind::Removed)
                .map(|l| l.content.as_str())
                .collect();
            prop_assert_eq!(old, a.iter().map(String::as_str).collect::<Vec<_>>());
            prop_assert_eq!(new, b.iter().map(String::as_str).collect::<Vec<_>>());
        }
    }
}
