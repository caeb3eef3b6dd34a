//! Atomic multi-file edit transactions.
//!
//! A transaction is an ordered list of operations over one or more files.
//! Every operation is validated up front, each file is read once, and the
//! operations run in order against per-file working copies. Files are only
//! written after the whole in-memory pass and the diagnostic report have
//! succeeded; every changed file is staged next to its target before the
//! first rename.
//!
//! The renames themselves are not atomic as a group. If one fails, the files
//! renamed before it stay replaced and [`TransactionError::Rename`] lists them.

use crate::analysis::{AnalysisError, AnalysisReport, Analyzer, SourceDocument};
use crate::cancel::CancellationToken;
use crate::edit::{self, EditError, StagedWrite, TextEdit};
use crate::error::{self, ErrorKind};
use crate::position::{self, LineIndex, PositionError};
use crate::workspace::{WorkspaceError, WorkspaceGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// One step of a transaction.
///
/// Coordinates are signed and fields optional on the wire so malformed
/// operations surface as validation issues instead of decode failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EditOperation {
    SetContent {
        #[serde(default)]
        file_path: PathBuf,
        #[serde(default)]
        new_content: Option<String>,
    },
    ReplaceSpan {
        #[serde(default)]
        file_path: PathBuf,
        #[serde(default)]
        start_line: Option<i64>,
        #[serde(default)]
        start_column: Option<i64>,
        #[serde(default)]
        end_line: Option<i64>,
        #[serde(default)]
        end_column: Option<i64>,
        #[serde(default)]
        new_text: Option<String>,
    },
}

impl EditOperation {
    pub fn set_content(file_path: impl Into<PathBuf>, new_content: impl Into<String>) -> Self {
        EditOperation::SetContent {
            file_path: file_path.into(),
            new_content: Some(new_content.into()),
        }
    }

    pub fn replace_span(
        file_path: impl Into<PathBuf>,
        start: (i64, i64),
        end: (i64, i64),
        new_text: impl Into<String>,
    ) -> Self {
        EditOperation::ReplaceSpan {
            file_path: file_path.into(),
            start_line: Some(start.0),
            start_column: Some(start.1),
            end_line: Some(end.0),
            end_column: Some(end.1),
            new_text: Some(new_text.into()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EditOperation::SetContent { .. } => "set_content",
            EditOperation::ReplaceSpan { .. } => "replace_span",
        }
    }

    pub fn file_path(&self) -> &Path {
        match self {
            EditOperation::SetContent { file_path, .. }
            | EditOperation::ReplaceSpan { file_path, .. } => file_path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    EmptyOperationList,
    MissingField {
        operation: usize,
        field: &'static str,
    },
    NonPositive {
        operation: usize,
        field: &'static str,
        value: i64,
    },
    FileNotFound {
        operation: usize,
        path: PathBuf,
    },
    NotAFile {
        operation: usize,
        path: PathBuf,
    },
    PathRejected {
        operation: usize,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyOperationList => write!(f, "transaction contains no operations"),
            ValidationIssue::MissingField { operation, field } => {
                write!(f, "operation {operation} missing required field '{field}'")
            }
            ValidationIssue::NonPositive {
                operation,
                field,
                value,
            } => write!(
                f,
                "operation {operation} field '{field}' must be a positive integer (got {value})"
            ),
            ValidationIssue::FileNotFound { operation, path } => {
                write!(f, "operation {operation} file not found: {}", path.display())
            }
            ValidationIssue::NotAFile { operation, path } => {
                write!(f, "operation {operation} path is not a file: {}", path.display())
            }
            ValidationIssue::PathRejected { operation, message } => {
                write!(f, "operation {operation} {message}")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("invalid transaction: {0}")]
    Invalid(#[from] ValidationError),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is not valid UTF-8 text", path.display())]
    NotUtf8 { path: PathBuf },

    #[error("operation {operation} ({}): {source}", path.display())]
    Span {
        operation: usize,
        path: PathBuf,
        #[source]
        source: PositionError,
    },

    #[error("operation {operation} ({}): span ends before it starts (byte {end} < {start})", path.display())]
    InvertedSpan {
        operation: usize,
        path: PathBuf,
        start: usize,
        end: usize,
    },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: EditError,
    },

    #[error(
        "failed to replace {}: {source}; already replaced: [{}]",
        path.display(),
        display_paths(written)
    )]
    Rename {
        path: PathBuf,
        /// Targets renamed into place before the failure
        written: Vec<PathBuf>,
        #[source]
        source: EditError,
    },

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("transaction cancelled")]
    Cancelled,
}

impl TransactionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransactionError::Invalid(_)
            | TransactionError::NotUtf8 { .. }
            | TransactionError::Span { .. }
            | TransactionError::InvertedSpan { .. } => ErrorKind::InvalidInput,
            TransactionError::Read { source, .. } => error::io_kind(source),
            TransactionError::Workspace(err) => err.kind(),
            TransactionError::Write { .. } | TransactionError::Rename { .. } => ErrorKind::Io,
            TransactionError::Analysis(err) => err.kind(),
            TransactionError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub file_path: PathBuf,
    pub changed: bool,
    /// Lines that differ between this operation's input and output
    pub changed_lines: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub file_path: PathBuf,
    pub operation_count: usize,
    pub changed: bool,
    /// Lines that differ between the file on disk and its final content
    pub changed_lines: Vec<usize>,
    pub written: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionResult {
    pub operation_count: usize,
    pub file_count: usize,
    pub changed_file_count: usize,
    pub changed_line_count: usize,
    pub written_file_count: usize,
    pub applied: bool,
    pub operations: Vec<OperationResult>,
    pub files: Vec<FileResult>,
    pub diagnostics_after_edit: AnalysisReport,
}

/// A validated operation, ready to run.
enum Change<'o> {
    Replace(&'o str),
    Span(TextEdit),
}

struct PlannedOperation<'o> {
    index: usize,
    kind: &'static str,
    path: PathBuf,
    change: Change<'o>,
}

struct WorkingFile {
    path: PathBuf,
    original: String,
    current: String,
    operation_count: usize,
}

/// Runs transactions against the file system. Holds no state between runs.
pub struct TransactionEngine<'a> {
    analyzer: &'a dyn Analyzer,
    guard: Option<&'a WorkspaceGuard>,
    cancel: &'a CancellationToken,
}

impl<'a> TransactionEngine<'a> {
    pub fn new(analyzer: &'a dyn Analyzer, cancel: &'a CancellationToken) -> Self {
        Self {
            analyzer,
            guard: None,
            cancel,
        }
    }

    /// Confine every operation's file to `guard`'s workspace.
    pub fn with_guard(mut self, guard: Option<&'a WorkspaceGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn run(
        &self,
        operations: &[EditOperation],
        apply: bool,
        max_diagnostics: usize,
    ) -> Result<TransactionResult, TransactionError> {
        let plan = self.validate(operations)?;
        let (files, operation_results) = self.execute(&plan)?;

        if self.cancel.is_cancelled() {
            return Err(TransactionError::Cancelled);
        }
        let documents: Vec<_> = files
            .iter()
            .map(|file| SourceDocument::new(&file.path, &file.current))
            .collect();
        let diagnostics = self
            .analyzer
            .analyze(&documents, max_diagnostics, self.cancel)?;

        let mut file_results: Vec<FileResult> = files
            .iter()
            .map(|file| {
                let changed_lines = position::changed_lines(&file.original, &file.current);
                FileResult {
                    file_path: file.path.clone(),
                    operation_count: file.operation_count,
                    changed: file.original != file.current,
                    changed_lines,
                    written: false,
                }
            })
            .collect();

        if apply {
            if self.cancel.is_cancelled() {
                return Err(TransactionError::Cancelled);
            }
            self.write_changed(&files, &mut file_results)?;
        }

        let result = TransactionResult {
            operation_count: operation_results.len(),
            file_count: file_results.len(),
            changed_file_count: file_results.iter().filter(|f| f.changed).count(),
            changed_line_count: file_results.iter().map(|f| f.changed_lines.len()).sum(),
            written_file_count: file_results.iter().filter(|f| f.written).count(),
            applied: apply,
            operations: operation_results,
            files: file_results,
            diagnostics_after_edit: diagnostics,
        };

        info!(
            operations = result.operation_count,
            files = result.file_count,
            written = result.written_file_count,
            applied = apply,
            "transaction finished"
        );
        Ok(result)
    }

    /// Check every operation, collecting all issues before failing.
    fn validate<'o>(
        &self,
        operations: &'o [EditOperation],
    ) -> Result<Vec<PlannedOperation<'o>>, ValidationError> {
        let mut issues = Vec::new();
        let mut plan = Vec::with_capacity(operations.len());

        if operations.is_empty() {
            issues.push(ValidationIssue::EmptyOperationList);
        }

        for (index, operation) in operations.iter().enumerate() {
            let path = self.validate_path(index, operation.file_path(), &mut issues);
            let change = match operation {
                EditOperation::SetContent { new_content, .. } => match new_content {
                    Some(text) => Some(Change::Replace(text.as_str())),
                    None => {
                        issues.push(ValidationIssue::MissingField {
                            operation: index,
                            field: "new_content",
                        });
                        None
                    }
                },
                EditOperation::ReplaceSpan {
                    start_line,
                    start_column,
                    end_line,
                    end_column,
                    new_text,
                    ..
                } => {
                    let start_line = coordinate(index, "start_line", *start_line, &mut issues);
                    let start_column =
                        coordinate(index, "start_column", *start_column, &mut issues);
                    let end_line = coordinate(index, "end_line", *end_line, &mut issues);
                    let end_column = coordinate(index, "end_column", *end_column, &mut issues);
                    if new_text.is_none() {
                        issues.push(ValidationIssue::MissingField {
                            operation: index,
                            field: "new_text",
                        });
                    }

                    match (start_line, start_column, end_line, end_column, new_text) {
                        (Some(sl), Some(sc), Some(el), Some(ec), Some(text)) => Some(
                            Change::Span(TextEdit::new((sl, sc), (el, ec), text.clone())),
                        ),
                        _ => None,
                    }
                }
            };

            if let (Some(path), Some(change)) = (path, change) {
                plan.push(PlannedOperation {
                    index,
                    kind: operation.kind(),
                    path,
                    change,
                });
            }
        }

        if issues.is_empty() {
            Ok(plan)
        } else {
            debug!(issues = issues.len(), "transaction rejected");
            Err(ValidationError { issues })
        }
    }

    /// Canonical path of an operation's file, which must already exist.
    fn validate_path(
        &self,
        operation: usize,
        path: &Path,
        issues: &mut Vec<ValidationIssue>,
    ) -> Option<PathBuf> {
        if path.as_os_str().is_empty() {
            issues.push(ValidationIssue::MissingField {
                operation,
                field: "file_path",
            });
            return None;
        }

        let resolved = match self.guard {
            Some(guard) => guard.resolve(path),
            None => path.canonicalize().map_err(|source| WorkspaceError::Resolve {
                path: path.to_path_buf(),
                source,
            }),
        };

        match resolved {
            Ok(canonical) if canonical.is_file() => Some(canonical),
            Ok(canonical) => {
                issues.push(ValidationIssue::NotAFile {
                    operation,
                    path: canonical,
                });
                None
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                issues.push(ValidationIssue::FileNotFound {
                    operation,
                    path: path.to_path_buf(),
                });
                None
            }
            Err(err) => {
                issues.push(ValidationIssue::PathRejected {
                    operation,
                    message: err.to_string(),
                });
                None
            }
        }
    }

    /// Read each file once, then run operations in order on working copies.
    fn execute(
        &self,
        plan: &[PlannedOperation<'_>],
    ) -> Result<(Vec<WorkingFile>, Vec<OperationResult>), TransactionError> {
        let mut files: Vec<WorkingFile> = Vec::new();
        let mut by_path: HashMap<&Path, usize> = HashMap::new();

        for step in plan {
            if by_path.contains_key(step.path.as_path()) {
                continue;
            }
            let content = read_text(&step.path)?;
            by_path.insert(step.path.as_path(), files.len());
            files.push(WorkingFile {
                path: step.path.clone(),
                original: content.clone(),
                current: content,
                operation_count: 0,
            });
        }

        let mut results = Vec::with_capacity(plan.len());
        for step in plan {
            if self.cancel.is_cancelled() {
                return Err(TransactionError::Cancelled);
            }

            let Some(&slot) = by_path.get(step.path.as_path()) else {
                continue;
            };
            let file = &mut files[slot];
            let next = match &step.change {
                Change::Replace(text) => (*text).to_string(),
                Change::Span(span) => apply_span(step, span, &file.current)?,
            };

            let changed_lines = position::changed_lines(&file.current, &next);
            results.push(OperationResult {
                index: step.index,
                kind: step.kind,
                file_path: step.path.clone(),
                changed: next != file.current,
                changed_lines,
            });
            file.current = next;
            file.operation_count += 1;
        }

        Ok((files, results))
    }

    /// Stage every changed file, then rename them all into place.
    fn write_changed(
        &self,
        files: &[WorkingFile],
        results: &mut [FileResult],
    ) -> Result<(), TransactionError> {
        let mut staged: Vec<(usize, StagedWrite)> = Vec::new();

        for (slot, file) in files.iter().enumerate() {
            if file.original == file.current {
                continue;
            }
            if let Some(guard) = self.guard {
                guard.recheck(&file.path)?;
            }
            let write = edit::stage_write(&file.path, file.current.as_bytes()).map_err(
                |source| TransactionError::Write {
                    path: file.path.clone(),
                    source,
                },
            )?;
            staged.push((slot, write));
        }

        let mut written: Vec<PathBuf> = Vec::with_capacity(staged.len());
        for (slot, write) in staged {
            let path = write.target().to_path_buf();
            if let Err(source) = write.commit() {
                warn!(path = %path.display(), replaced = written.len(), "transaction rename failed");
                return Err(TransactionError::Rename {
                    path,
                    written,
                    source,
                });
            }
            results[slot].written = true;
            debug!(path = %path.display(), "transaction file written");
            written.push(path);
        }

        Ok(())
    }
}

/// Positive coordinate from the wire, recording an issue otherwise.
fn coordinate(
    operation: usize,
    field: &'static str,
    value: Option<i64>,
    issues: &mut Vec<ValidationIssue>,
) -> Option<usize> {
    let Some(value) = value else {
        issues.push(ValidationIssue::MissingField { operation, field });
        return None;
    };
    match usize::try_from(value) {
        Ok(v) if v >= 1 => Some(v),
        _ => {
            issues.push(ValidationIssue::NonPositive {
                operation,
                field,
                value,
            });
            None
        }
    }
}

fn apply_span(
    step: &PlannedOperation<'_>,
    span: &TextEdit,
    text: &str,
) -> Result<String, TransactionError> {
    let index = LineIndex::new(text);
    let resolve = |line, column| {
        index
            .offset(line, column, true)
            .map_err(|source| TransactionError::Span {
                operation: step.index,
                path: step.path.clone(),
                source,
            })
    };
    let start = resolve(span.start_line, span.start_column)?;
    let end = resolve(span.end_line, span.end_column)?;

    if end < start {
        return Err(TransactionError::InvertedSpan {
            operation: step.index,
            path: step.path.clone(),
            start,
            end,
        });
    }
    Ok(edit::replace_range(text, start, end, &span.new_text))
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_text(path: &Path) -> Result<String, TransactionError> {
    let bytes = fs::read(path).map_err(|source| TransactionError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|_| TransactionError::NotUtf8 {
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::SyntaxAnalyzer;
    use tempfile::TempDir;

    fn run(
        operations: &[EditOperation],
        apply: bool,
    ) -> Result<TransactionResult, TransactionError> {
        let analyzer = SyntaxAnalyzer::new();
        let cancel = CancellationToken::new();
        TransactionEngine::new(&analyzer, &cancel).run(operations, apply, 50)
    }

    #[test]
    fn spans_on_one_file_resolve_sequentially() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "abc\ndef\n").unwrap();

        let result = run(
            &[
                EditOperation::replace_span(&path, (1, 1), (1, 4), "x\ny"),
                EditOperation::replace_span(&path, (3, 1), (3, 4), "DEF"),
            ],
            true,
        )
        .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "x\ny\nDEF\n");
        assert_eq!(result.file_count, 1);
        assert_eq!(result.operations[1].changed_lines, vec![3]);
        assert_eq!(result.files[0].changed_lines, vec![1, 2, 3, 4]);
        assert_eq!(result.written_file_count, 1);
    }

    /// Replaces `victim` with a non-empty directory while the report is
    /// built, so its rename fails after earlier files were replaced.
    struct ClobberingAnalyzer {
        victim: PathBuf,
    }

    impl Analyzer for ClobberingAnalyzer {
        fn parse(
            &self,
            _path: &Path,
            _text: &str,
        ) -> Result<Option<crate::analysis::SyntaxTree>, AnalysisError> {
            Ok(None)
        }

        fn reparse(
            &self,
            previous: &crate::analysis::SyntaxTree,
            _change: &crate::analysis::TextChange,
            _text: &str,
        ) -> Result<crate::analysis::SyntaxTree, AnalysisError> {
            Err(AnalysisError::ReparseFailed {
                language: format!("{:?}", previous.language()),
            })
        }

        fn analyze(
            &self,
            _documents: &[SourceDocument<'_>],
            _max_diagnostics: usize,
            _cancel: &CancellationToken,
        ) -> Result<AnalysisReport, AnalysisError> {
            fs::remove_file(&self.victim).unwrap();
            fs::create_dir(&self.victim).unwrap();
            fs::write(self.victim.join("occupant"), "x").unwrap();
            Ok(AnalysisReport::default())
        }
    }

    #[test]
    fn failed_rename_names_files_already_replaced() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("first.txt");
        let second = dir.path().join("second.txt");
        fs::write(&first, "one\n").unwrap();
        fs::write(&second, "two\n").unwrap();

        let analyzer = ClobberingAnalyzer {
            victim: second.canonicalize().unwrap(),
        };
        let cancel = CancellationToken::new();
        let err = TransactionEngine::new(&analyzer, &cancel)
            .run(
                &[
                    EditOperation::set_content(&first, "ONE\n"),
                    EditOperation::set_content(&second, "TWO\n"),
                ],
                true,
                10,
            )
            .unwrap_err();

        let TransactionError::Rename { path, written, .. } = &err else {
            panic!("expected rename failure, got {err}");
        };
        assert_eq!(path, &second.canonicalize().unwrap());
        assert_eq!(written, &vec![first.canonicalize().unwrap()]);
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("first.txt"));
        assert_eq!(fs::read_to_string(&first).unwrap(), "ONE\n");
    }

    #[test]
    fn dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "old\n").unwrap();

        let result = run(&[EditOperation::set_content(&path, "new\n")], false).unwrap();
        assert!(!result.applied);
        assert_eq!(result.changed_file_count, 1);
        assert_eq!(result.written_file_count, 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "old\n");
    }

    #[test]
    fn any_invalid_operation_prevents_all_writes() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.txt");
        fs::write(&good, "keep\n").unwrap();

        let err = run(
            &[
                EditOperation::set_content(&good, "changed\n"),
                EditOperation::replace_span(&good, (0, 1), (1, -2), "x"),
                EditOperation::set_content(dir.path().join("missing.txt"), ""),
            ],
            true,
        )
        .unwrap_err();

        let TransactionError::Invalid(validation) = &err else {
            panic!("expected validation failure, got {err:?}");
        };
        assert_eq!(validation.issues.len(), 3);
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(fs::read_to_string(&good).unwrap(), "keep\n");
    }

    #[test]
    fn inverted_span_fails_without_writing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "one\ntwo\n").unwrap();

        let err = run(
            &[
                EditOperation::set_content(&path, "one\ntwo\nthree\n"),
                EditOperation::replace_span(&path, (2, 3), (1, 1), "x"),
            ],
            true,
        )
        .unwrap_err();
        assert!(matches!(err, TransactionError::InvertedSpan { operation: 1, .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn empty_transaction_is_invalid() {
        let err = run(&[], true).unwrap_err();
        assert!(err.to_string().contains("no operations"));
    }

    #[test]
    fn reports_diagnostics_across_files() {
        let dir = TempDir::new().unwrap();
        let ok = dir.path().join("ok.rs");
        let broken = dir.path().join("broken.rs");
        fs::write(&ok, "fn ok() {}\n").unwrap();
        fs::write(&broken, "fn broken() {}\n").unwrap();

        let result = run(
            &[
                EditOperation::set_content(&ok, "fn ok() { 1 }\n"),
                EditOperation::replace_span(&broken, (1, 14), (1, 15), ""),
            ],
            false,
        )
        .unwrap();

        assert!(result.diagnostics_after_edit.error_count > 0);
        let broken = broken.canonicalize().unwrap();
        assert!(result
            .diagnostics_after_edit
            .diagnostics
            .iter()
            .all(|d| d.file == broken));
    }

    #[test]
    fn cancelled_transaction_never_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "old\n").unwrap();

        let analyzer = SyntaxAnalyzer::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = TransactionEngine::new(&analyzer, &cancel)
            .run(&[EditOperation::set_content(&path, "new\n")], true, 10)
            .unwrap_err();

        assert!(matches!(err, TransactionError::Cancelled));
        assert_eq!(fs::read_to_string(&path).unwrap(), "old\n");
    }

    #[test]
    fn guard_rejects_paths_outside_workspace() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path().join("ws");
        fs::create_dir_all(&workspace).unwrap();
        let outside = dir.path().join("outside.txt");
        fs::write(&outside, "x").unwrap();

        let guard = WorkspaceGuard::new(&workspace, &[]).unwrap();
        let analyzer = SyntaxAnalyzer::new();
        let cancel = CancellationToken::new();
        let err = TransactionEngine::new(&analyzer, &cancel)
            .with_guard(Some(&guard))
            .run(&[EditOperation::set_content(&outside, "y")], true, 10)
            .unwrap_err();

        let TransactionError::Invalid(validation) = err else {
            panic!("expected validation failure");
        };
        assert!(matches!(
            validation.issues[0],
            ValidationIssue::PathRejected { operation: 0, .. }
        ));
    }

    #[test]
    fn operations_decode_from_tagged_json() {
        let json = r#"[
            {"type": "set_content", "file_path": "a.txt", "new_content": "x"},
            {"type": "replace_span", "file_path": "b.txt", "start_line": 1,
             "start_column": 1, "end_line": 1, "end_column": 2, "new_text": "y"}
        ]"#;
        let operations: Vec<EditOperation> = serde_json::from_str(json).unwrap();
        assert_eq!(operations[0], EditOperation::set_content("a.txt", "x"));
        assert_eq!(
            operations[1],
            EditOperation::replace_span("b.txt", (1, 1), (1, 2), "y")
        );
    }
}
