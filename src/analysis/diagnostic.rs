//! Diagnostic types and syntax-error extraction.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SYNTAX_ERROR: &str = "syntax-error";
pub const MISSING_TOKEN: &str = "missing-token";

/// Longest source excerpt quoted in a syntax-error message.
const EXCERPT_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub id: String,
    pub severity: Severity,
    pub message: String,
    pub file: PathBuf,
    /// 1-based
    pub line: usize,
    /// 1-based, in characters
    pub column: usize,
}

/// Bounded, ordered diagnostic listing with counts over the full set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub total: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub returned: usize,
    pub truncated: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl AnalysisReport {
    /// Sort by `(line, column, id)` and keep at most `max` entries.
    ///
    /// The file path only breaks ties left after the documented key, so a
    /// multi-file report interleaves files by position.
    pub fn from_diagnostics(mut diagnostics: Vec<Diagnostic>, max: usize) -> Self {
        diagnostics.sort_by(|a, b| {
            (a.line, a.column, &a.id, &a.file).cmp(&(b.line, b.column, &b.id, &b.file))
        });

        let total = diagnostics.len();
        let error_count = diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count();
        let warning_count = diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count();

        diagnostics.truncate(max);

        Self {
            total,
            error_count,
            warning_count,
            returned: diagnostics.len(),
            truncated: total > max,
            diagnostics,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.error_count == 0
    }
}

/// Collect ERROR and MISSING nodes of a parse tree as diagnostics.
///
/// ERROR subtrees are reported once at their root rather than once per
/// nested error node.
pub fn syntax_diagnostics(path: &Path, source: &str, tree: &tree_sitter::Tree) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    collect_recursive(tree.root_node(), path, source, &mut out);
    out
}

fn collect_recursive(
    node: tree_sitter::Node<'_>,
    path: &Path,
    source: &str,
    out: &mut Vec<Diagnostic>,
) {
    if node.is_missing() {
        out.push(diagnostic_at(
            node,
            path,
            source,
            MISSING_TOKEN,
            format!("missing `{}`", node.kind()),
        ));
        return;
    }

    if node.is_error() {
        let message = match excerpt(source, node.start_byte(), node.end_byte()) {
            Some(text) => format!("syntax error near `{text}`"),
            None => "syntax error".to_string(),
        };
        out.push(diagnostic_at(node, path, source, SYNTAX_ERROR, message));
        return;
    }

    if !node.has_error() {
        return;
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_recursive(child, path, source, out);
    }
}

fn diagnostic_at(
    node: tree_sitter::Node<'_>,
    path: &Path,
    source: &str,
    id: &str,
    message: String,
) -> Diagnostic {
    let start = node.start_byte().min(source.len());
    let line_start = source
        .get(..start)
        .and_then(|before| before.rfind('\n'))
        .map_or(0, |i| i + 1);
    let column = source
        .get(line_start..start)
        .map_or(1, |prefix| prefix.chars().count() + 1);

    Diagnostic {
        id: id.to_string(),
        severity: Severity::Error,
        message,
        file: path.to_path_buf(),
        line: node.start_position().row + 1,
        column,
    }
}

/// First line of the node's text, trimmed and shortened for messages.
fn excerpt(source: &str, start: usize, end: usize) -> Option<String> {
    let text = source.get(start..end)?.lines().next()?.trim();
    if text.is_empty() {
        return None;
    }
    let mut short: String = text.chars().take(EXCERPT_CHARS).collect();
    if text.chars().count() > EXCERPT_CHARS {
        short.push('…');
    }
    Some(short)
}
