use crate::error::{self, ErrorKind};
use crate::position::{LineIndex, PositionError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A line/column addressed replacement inside one document.
///
/// A batch of these is resolved against a single before-text and applied
/// simultaneously, so positions never need adjusting for earlier edits in
/// the same batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
    #[serde(default)]
    pub new_text: String,
}

impl TextEdit {
    pub fn new(
        start: (usize, usize),
        end: (usize, usize),
        new_text: impl Into<String>,
    ) -> Self {
        Self {
            start_line: start.0,
            start_column: start.1,
            end_line: end.0,
            end_column: end.1,
            new_text: new_text.into(),
        }
    }
}

/// A byte-span replacement: `[start, end)` becomes `new_text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSpan<'e> {
    /// Position of the edit in the caller's batch
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub new_text: &'e str,
}

#[derive(Error, Debug)]
pub enum EditError {
    #[error("edit {index}: {source}")]
    Position {
        index: usize,
        #[source]
        source: PositionError,
    },

    #[error("edit {index} ends before it starts (byte {end} < {start})")]
    InvertedSpan {
        index: usize,
        start: usize,
        end: usize,
    },

    #[error("edits {first} and {second} overlap: byte {first_end} > {second_start}")]
    Overlap {
        first: usize,
        second: usize,
        first_end: usize,
        second_start: usize,
    },

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EditError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EditError::Io(err) => error::io_kind(err),
            _ => ErrorKind::InvalidInput,
        }
    }
}

/// Resolve one edit against a prepared line index.
pub fn resolve_span<'e>(
    index: &LineIndex<'_>,
    position: usize,
    edit: &'e TextEdit,
) -> Result<ResolvedSpan<'e>, EditError> {
    let start = index
        .offset(edit.start_line, edit.start_column, true)
        .map_err(|source| EditError::Position {
            index: position,
            source,
        })?;
    let end = index
        .offset(edit.end_line, edit.end_column, true)
        .map_err(|source| EditError::Position {
            index: position,
            source,
        })?;

    if end < start {
        return Err(EditError::InvertedSpan {
            index: position,
            start,
            end,
        });
    }

    Ok(ResolvedSpan {
        index: position,
        start,
        end,
        new_text: &edit.new_text,
    })
}

/// Resolve every edit against `text` and order the spans by `(start, end)`.
///
/// Fails if any span is inverted or if two spans overlap.
pub fn resolve_batch<'e>(
    text: &str,
    edits: &'e [TextEdit],
) -> Result<Vec<ResolvedSpan<'e>>, EditError> {
    let index = LineIndex::new(text);
    let mut spans = edits
        .iter()
        .enumerate()
        .map(|(position, edit)| resolve_span(&index, position, edit))
        .collect::<Result<Vec<_>, _>>()?;

    // Stable sort: inserts at the same offset keep their batch order.
    spans.sort_by_key(|span| (span.start, span.end));

    // For non-overlapping regions: previous end <= next start
    for window in spans.windows(2) {
        let (previous, next) = (&window[0], &window[1]);
        if previous.end > next.start {
            return Err(EditError::Overlap {
                first: previous.index,
                second: next.index,
                first_end: previous.end,
                second_start: next.start,
            });
        }
    }

    Ok(spans)
}

/// Splice sorted, non-overlapping spans into `text` in one pass.
pub fn splice(text: &str, spans: &[ResolvedSpan<'_>]) -> String {
    let inserted: usize = spans.iter().map(|span| span.new_text.len()).sum();
    let mut out = String::with_capacity(text.len() + inserted);
    let mut cursor = 0;

    for span in spans {
        out.push_str(&text[cursor..span.start]);
        out.push_str(span.new_text);
        cursor = span.end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Apply a batch of edits simultaneously against `text`.
pub fn apply_batch(text: &str, edits: &[TextEdit]) -> Result<String, EditError> {
    let spans = resolve_batch(text, edits)?;
    Ok(splice(text, &spans))
}

/// Replace the byte range `[start, end)` of `text`.
pub fn replace_range(text: &str, start: usize, end: usize, new_text: &str) -> String {
    let mut out = String::with_capacity(text.len() + new_text.len() - (end - start));
    out.push_str(&text[..start]);
    out.push_str(new_text);
    out.push_str(&text[end..]);
    out
}

/// A fully written and synced temp file waiting to replace its target.
///
/// Staging every file first lets a multi-file write fail before any target
/// is touched.
#[derive(Debug)]
pub struct StagedWrite {
    target: PathBuf,
    temp: tempfile::NamedTempFile,
}

impl StagedWrite {
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Atomically rename the staged file over its target.
    pub fn commit(self) -> Result<(), EditError> {
        self.temp.persist(&self.target).map_err(|e| e.error)?;
        Ok(())
    }

    /// Rename the staged file into place only if the target does not exist.
    ///
    /// Returns `false`, leaving the target untouched, when it already exists.
    pub fn commit_new(self) -> Result<bool, EditError> {
        match self.temp.persist_noclobber(&self.target) {
            Ok(_) => Ok(true),
            Err(err) if err.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(EditError::Io(err.error)),
        }
    }
}

/// Write `content` to a synced temp file in the same directory as `path`.
pub fn stage_write(path: &Path, content: &[u8]) -> Result<StagedWrite, EditError> {
    // Create tempfile in same directory to ensure same filesystem
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        Some(_) => Path::new("."),
        None => {
            return Err(EditError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Path has no parent directory",
            )))
        }
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;

    // Keep the target's permissions when replacing an existing file
    if let Ok(metadata) = fs::metadata(path) {
        fs::set_permissions(temp.path(), metadata.permissions())?;
    }

    Ok(StagedWrite {
        target: path.to_path_buf(),
        temp,
    })
}

/// Atomic file write: tempfile + fsync + rename.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<(), EditError> {
    stage_write(path, content)?.commit()
}
