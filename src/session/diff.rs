use serde::{Deserialize, Serialize};
use similar::TextDiff;

/// One differing line between the original and current snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineChange {
    /// 1-based
    pub line: usize,
    /// `None` when the line does not exist in the original
    pub before: Option<String>,
    /// `None` when the line does not exist in the current content
    pub after: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub total_changed_lines: usize,
    pub returned_changed_lines: usize,
    pub truncated: bool,
    pub changes: Vec<LineChange>,
}

/// Positional line comparison, collecting at most `max_changes` pairs.
///
/// Counting continues past the limit so `total_changed_lines` is exact.
pub fn build_diff(original: &str, current: &str, max_changes: usize) -> DiffResult {
    let before: Vec<&str> = original.split('\n').collect();
    let after: Vec<&str> = current.split('\n').collect();
    let mut result = DiffResult::default();

    for i in 0..before.len().max(after.len()) {
        let old = before.get(i).copied();
        let new = after.get(i).copied();
        if old.unwrap_or("") == new.unwrap_or("") {
            continue;
        }

        result.total_changed_lines += 1;
        if result.changes.len() < max_changes {
            result.changes.push(LineChange {
                line: i + 1,
                before: old.map(display_line),
                after: new.map(display_line),
            });
        } else {
            result.truncated = true;
        }
    }

    result.returned_changed_lines = result.changes.len();
    result
}

fn display_line(line: &str) -> String {
    line.strip_suffix('\r').unwrap_or(line).to_string()
}

/// Unified diff text between the two snapshots.
pub fn unified_diff(label: &str, original: &str, current: &str) -> String {
    TextDiff::from_lines(original, current)
        .unified_diff()
        .context_radius(3)
        .header(&format!("{label} (original)"), &format!("{label} (session)"))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_has_no_changes() {
        let diff = build_diff("a\nb\n", "a\nb\n", 10);
        assert_eq!(diff.total_changed_lines, 0);
        assert!(diff.changes.is_empty());
        assert!(!diff.truncated);
    }

    #[test]
    fn reports_before_and_after() {
        let diff = build_diff("a\nb\nc", "a\nB\nc\nd", 10);
        assert_eq!(diff.total_changed_lines, 2);
        assert_eq!(
            diff.changes,
            vec![
                LineChange {
                    line: 2,
                    before: Some("b".into()),
                    after: Some("B".into())
                },
                LineChange {
                    line: 4,
                    before: None,
                    after: Some("d".into())
                },
            ]
        );
    }

    #[test]
    fn truncates_but_keeps_counting() {
        let diff = build_diff("1\n2\n3\n4", "a\nb\nc\nd", 2);
        assert_eq!(diff.total_changed_lines, 4);
        assert_eq!(diff.returned_changed_lines, 2);
        assert!(diff.truncated);
        assert_eq!(diff.changes[1].line, 2);
    }

    #[test]
    fn unified_diff_marks_changed_lines() {
        let text = unified_diff("lib.rs", "a\nb\n", "a\nc\n");
        assert!(text.contains("-b"));
        assert!(text.contains("+c"));
        assert!(text.contains("lib.rs (original)"));
    }
}
