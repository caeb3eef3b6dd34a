//! Line/column addressing over text snapshots.
//!
//! Callers address text with 1-based `(line, column)` pairs where columns
//! count Unicode scalar values. Internally every position becomes a UTF-8
//! byte offset so it can slice the `String` directly.
//!
//! Lines are separated by `\n`. A `\r` right before the `\n` belongs to the
//! terminator and is not part of the line's length.

use crate::error::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PositionError {
    #[error("line {line} is out of range (document has {line_count} lines)")]
    LineOutOfRange { line: usize, line_count: usize },
}

impl PositionError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

/// Precomputed line starts for one text snapshot.
///
/// Build once per snapshot when several positions are resolved against the
/// same text (a batch of edits), instead of rescanning for each.
#[derive(Debug, Clone)]
pub struct LineIndex<'a> {
    text: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { text, starts }
    }

    pub fn line_count(&self) -> usize {
        self.starts.len()
    }

    /// Content of a 1-based line without its terminator.
    fn line_content(&self, line: usize) -> (usize, &'a str) {
        let start = self.starts[line - 1];
        let end = match self.starts.get(line) {
            Some(next) => next - 1,
            None => self.text.len(),
        };
        let content = &self.text[start..end];
        (start, content.strip_suffix('\r').unwrap_or(content))
    }

    /// Resolve a 1-based `(line, column)` to a byte offset.
    ///
    /// `column - 1` is clamped to `[0, line_length]` when `allow_line_end`
    /// is set, otherwise to `[0, line_length - 1]`.
    pub fn offset(
        &self,
        line: usize,
        column: usize,
        allow_line_end: bool,
    ) -> Result<usize, PositionError> {
        if line == 0 || line > self.line_count() {
            return Err(PositionError::LineOutOfRange {
                line,
                line_count: self.line_count(),
            });
        }

        let (start, content) = self.line_content(line);
        let length = content.chars().count();
        let max = if allow_line_end {
            length
        } else {
            length.saturating_sub(1)
        };
        let index = column.saturating_sub(1).min(max);

        let byte = content
            .char_indices()
            .nth(index)
            .map(|(byte, _)| byte)
            .unwrap_or(content.len());

        Ok(start + byte)
    }
}

/// Resolve a single position against `text`.
pub fn resolve_offset(
    text: &str,
    line: usize,
    column: usize,
    allow_line_end: bool,
) -> Result<usize, PositionError> {
    LineIndex::new(text).offset(line, column, allow_line_end)
}

/// Number of lines in `text`; a trailing newline opens one more (empty) line.
pub fn line_count(text: &str) -> usize {
    text.bytes().filter(|b| *b == b'\n').count() + 1
}

/// 1-based line numbers whose content differs between two snapshots.
///
/// Lines are compared by position over `max(old_lines, new_lines)`, with
/// missing trailing lines treated as empty.
pub fn changed_lines(before: &str, after: &str) -> Vec<usize> {
    let old: Vec<&str> = before.split('\n').collect();
    let new: Vec<&str> = after.split('\n').collect();
    let total = old.len().max(new.len());

    (0..total)
        .filter(|&i| old.get(i).copied().unwrap_or("") != new.get(i).copied().unwrap_or(""))
        .map(|i| i + 1)
        .collect()
}

/// Convert a byte column within `line_text` into a 1-based character column.
pub fn char_column(line_text: &str, byte_column: usize) -> usize {
    let clamped = byte_column.min(line_text.len());
    let prefix = line_text.get(..clamped).unwrap_or(line_text);
    prefix.chars().count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "alpha\nbeta\r\n\ngamma";

    #[test]
    fn resolves_line_starts() {
        assert_eq!(resolve_offset(TEXT, 1, 1, false).unwrap(), 0);
        assert_eq!(resolve_offset(TEXT, 2, 1, false).unwrap(), 6);
        assert_eq!(resolve_offset(TEXT, 4, 1, false).unwrap(), 13);
    }

    #[test]
    fn clamps_column_to_line_end() {
        // "alpha" has 5 chars: end-of-line offset is 5, last char offset is 4.
        assert_eq!(resolve_offset(TEXT, 1, 99, true).unwrap(), 5);
        assert_eq!(resolve_offset(TEXT, 1, 99, false).unwrap(), 4);
        assert_eq!(resolve_offset(TEXT, 1, 0, true).unwrap(), 0);
    }

    #[test]
    fn carriage_return_is_part_of_terminator() {
        // "beta\r\n": line end must stop before the '\r'.
        assert_eq!(resolve_offset(TEXT, 2, 99, true).unwrap(), 10);
    }

    #[test]
    fn empty_line_clamps_to_its_start() {
        assert_eq!(resolve_offset(TEXT, 3, 5, true).unwrap(), 12);
        assert_eq!(resolve_offset(TEXT, 3, 5, false).unwrap(), 12);
    }

    #[test]
    fn rejects_out_of_range_lines() {
        assert_eq!(
            resolve_offset(TEXT, 0, 1, true),
            Err(PositionError::LineOutOfRange {
                line: 0,
                line_count: 4
            })
        );
        assert!(matches!(
            resolve_offset(TEXT, 5, 1, true),
            Err(PositionError::LineOutOfRange { line: 5, .. })
        ));
    }

    #[test]
    fn columns_count_characters_not_bytes() {
        let text = "héllo";
        // 'l' is the third character but starts at byte 3.
        assert_eq!(resolve_offset(text, 1, 3, false).unwrap(), 3);
        assert_eq!(resolve_offset(text, 1, 6, true).unwrap(), text.len());
    }

    #[test]
    fn counts_lines() {
        assert_eq!(line_count(""), 1);
        assert_eq!(line_count("a"), 1);
        assert_eq!(line_count("a\n"), 2);
        assert_eq!(line_count(TEXT), 4);
    }

    #[test]
    fn changed_lines_positional() {
        assert_eq!(changed_lines("a\nb\nc", "a\nB\nc"), vec![2]);
        assert_eq!(changed_lines("a\nb", "a\nb\nc"), vec![3]);
        assert_eq!(changed_lines("a\nb\nc", "a"), vec![2, 3]);
        assert!(changed_lines("same", "same").is_empty());
    }

    #[test]
    fn missing_trailing_lines_count_as_empty() {
        // "a\n" has an empty second line; "a" has no second line at all.
        assert!(changed_lines("a\n", "a").is_empty());
    }

    #[test]
    fn char_column_from_bytes() {
        assert_eq!(char_column("héllo", 0), 1);
        assert_eq!(char_column("héllo", 3), 3);
        assert_eq!(char_column("abc", 99), 4);
    }
}
