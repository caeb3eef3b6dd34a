use super::diff::{self, DiffResult};
use super::sync::{self, SyncInputs, SyncState};
use crate::analysis::{
    AnalysisError, AnalysisReport, Analyzer, SourceDocument, SyntaxTree, TextChange,
};
use crate::cancel::CancellationToken;
use crate::edit::{self, EditError, TextEdit};
use crate::error::{self, ErrorKind};
use crate::hash::ContentHash;
use crate::position;
use crate::store::SessionRecord;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is not valid UTF-8 text", path.display())]
    NotUtf8 { path: PathBuf },

    #[error("generation conflict: expected {expected}, actual {actual}")]
    GenerationConflict { expected: u64, actual: u64 },

    #[error("invalid edits: {0}")]
    InvalidEdits(#[source] EditError),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: EditError,
    },

    #[error("commit refused: file is {state} on disk; commit with override to replace it")]
    CommitConflict { state: SyncState },

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("operation cancelled")]
    Cancelled,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Read { source, .. } => error::io_kind(source),
            SessionError::NotUtf8 { .. } | SessionError::InvalidEdits(_) => {
                ErrorKind::InvalidInput
            }
            SessionError::GenerationConflict { .. } | SessionError::CommitConflict { .. } => {
                ErrorKind::Conflict
            }
            SessionError::Write { source, .. } => match source {
                EditError::Io(_) => ErrorKind::Io,
                other => other.kind(),
            },
            SessionError::Analysis(err) => err.kind(),
            SessionError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// What a snapshot needs to run the analysis engine.
#[derive(Clone, Copy)]
pub struct SnapshotContext<'a> {
    pub analyzer: &'a dyn Analyzer,
    pub max_diagnostics: usize,
    pub cancel: &'a CancellationToken,
}

impl<'a> SnapshotContext<'a> {
    pub fn new(
        analyzer: &'a dyn Analyzer,
        max_diagnostics: usize,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            analyzer,
            max_diagnostics,
            cancel,
        }
    }
}

/// Analysis of the current content at one generation.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub generation: u64,
    pub line_count: usize,
    pub char_count: usize,
    pub has_changes: bool,
    pub content_hash: String,
    pub diagnostics: AnalysisReport,
}

/// Outcome of a set-content or apply-text-edits call.
#[derive(Debug, Clone, Serialize)]
pub struct ContentUpdate {
    pub changed: bool,
    pub previous_generation: u64,
    pub generation: u64,
    /// 1-based lines that differ from the previous content
    pub changed_lines: Vec<usize>,
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub sync_state: SyncState,
    pub recommended_action: &'static str,
    pub disk_exists: bool,
    pub has_changes: bool,
    pub generation: u64,
    pub open_disk_hash_prefix: String,
    pub current_hash_prefix: String,
    pub disk_hash_prefix: Option<String>,
    pub committed_hash_prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitOutcome {
    /// Disk state observed just before the write
    pub previous_state: SyncState,
    /// Whether the write replaced content this session had never seen
    pub overridden: bool,
    pub bytes_written: usize,
    pub content_hash: String,
}

/// Identity and size of a session, as reported by open and list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionOverview {
    pub session_id: String,
    pub file_path: PathBuf,
    pub generation: u64,
    pub line_count: usize,
    pub char_count: usize,
    pub content_hash: String,
    pub has_changes: bool,
}

impl SessionOverview {
    pub(crate) fn describe(
        session_id: &str,
        file_path: &Path,
        current: &str,
        current_hash: &ContentHash,
        open_hash: &ContentHash,
        generation: u64,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            file_path: file_path.to_path_buf(),
            generation,
            line_count: position::line_count(current),
            char_count: current.chars().count(),
            content_hash: current_hash.to_string(),
            has_changes: current_hash != open_hash,
        }
    }
}

/// Per-session parse tree, built on first analysis.
enum TreeState {
    Unparsed,
    /// No grammar applies to this file
    Unsupported,
    Parsed(SyntaxTree),
}

impl TreeState {
    fn parsed(&self) -> Option<&SyntaxTree> {
        match self {
            TreeState::Parsed(tree) => Some(tree),
            _ => None,
        }
    }

    fn parse(analyzer: &dyn Analyzer, path: &Path, text: &str) -> Result<Self, AnalysisError> {
        Ok(match analyzer.parse(path, text)? {
            Some(tree) => TreeState::Parsed(tree),
            None => TreeState::Unsupported,
        })
    }
}

struct SessionState {
    original: String,
    current: String,
    current_hash: ContentHash,
    open_disk_hash: ContentHash,
    committed_disk_hash: Option<ContentHash>,
    generation: u64,
    tree: TreeState,
}

impl SessionState {
    fn sync_inputs<'a>(&'a self, disk: Option<&'a ContentHash>) -> SyncInputs<'a> {
        SyncInputs {
            open: &self.open_disk_hash,
            current: &self.current_hash,
            committed: self.committed_disk_hash.as_ref(),
            disk,
        }
    }

    fn has_changes(&self) -> bool {
        self.current_hash != self.open_disk_hash
    }
}

/// One open document: original and current content plus a generation
/// counter, all behind a single gate.
///
/// The generation advances exactly once per call that changes content, so
/// a generation number identifies one content value for the session's
/// whole life. Callers pass the generation they last saw to detect
/// interleaved writers.
pub struct DocumentSession {
    id: String,
    file_path: PathBuf,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for DocumentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSession")
            .field("id", &self.id)
            .field("file_path", &self.file_path)
            .field("generation", &self.generation())
            .finish()
    }
}

impl DocumentSession {
    /// Read `file_path` once and start a session at generation 0.
    pub fn open(id: impl Into<String>, file_path: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let id = id.into();
        let file_path = file_path.into();

        let bytes = fs::read(&file_path).map_err(|source| SessionError::Read {
            path: file_path.clone(),
            source,
        })?;
        let content = String::from_utf8(bytes).map_err(|_| SessionError::NotUtf8 {
            path: file_path.clone(),
        })?;
        let hash = ContentHash::of(&content);

        info!(session = %id, path = %file_path.display(), bytes = content.len(), "session opened");

        Ok(Self {
            id,
            file_path,
            state: Mutex::new(SessionState {
                original: content.clone(),
                current: content,
                current_hash: hash.clone(),
                open_disk_hash: hash,
                committed_disk_hash: None,
                generation: 0,
                tree: TreeState::Unparsed,
            }),
        })
    }

    /// Rebuild a session from its persisted record. The parse tree is
    /// rebuilt lazily on the first analysis.
    pub fn from_record(record: SessionRecord) -> Self {
        let current_hash = ContentHash::of(&record.current_content);
        Self {
            id: record.session_id,
            file_path: record.file_path,
            state: Mutex::new(SessionState {
                original: record.original_content,
                current: record.current_content,
                current_hash,
                open_disk_hash: record.open_disk_hash,
                committed_disk_hash: record.committed_disk_hash,
                generation: record.generation,
                tree: TreeState::Unparsed,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn current_content(&self) -> String {
        self.state.lock().current.clone()
    }

    pub fn original_content(&self) -> String {
        self.state.lock().original.clone()
    }

    pub fn overview(&self) -> SessionOverview {
        let state = self.state.lock();
        SessionOverview::describe(
            &self.id,
            &self.file_path,
            &state.current,
            &state.current_hash,
            &state.open_disk_hash,
            state.generation,
        )
    }

    /// Persisted form of the session as of now.
    pub fn record(&self) -> SessionRecord {
        self.persist_with(|record| record.clone())
    }

    /// Run `write` on the current record while holding the session gate,
    /// so no later mutation can be overwritten by an older record.
    pub fn persist_with<T>(&self, write: impl FnOnce(&SessionRecord) -> T) -> T {
        let state = self.state.lock();
        let record = SessionRecord::new(
            &self.id,
            &self.file_path,
            &state.original,
            &state.current,
            &state.open_disk_hash,
            state.committed_disk_hash.as_ref(),
            state.generation,
        );
        write(&record)
    }

    /// Replace the whole buffer.
    pub fn set_content(
        &self,
        new_content: String,
        expected_generation: Option<u64>,
        ctx: &SnapshotContext<'_>,
    ) -> Result<ContentUpdate, SessionError> {
        let mut state = self.state.lock();
        check_generation(&state, expected_generation)?;
        self.replace_content(&mut state, new_content, ctx)
    }

    /// Apply a batch of edits resolved against the current content.
    pub fn apply_text_edits(
        &self,
        edits: &[TextEdit],
        expected_generation: Option<u64>,
        ctx: &SnapshotContext<'_>,
    ) -> Result<ContentUpdate, SessionError> {
        let mut state = self.state.lock();
        check_generation(&state, expected_generation)?;
        let candidate =
            edit::apply_batch(&state.current, edits).map_err(SessionError::InvalidEdits)?;
        debug!(session = %self.id, edits = edits.len(), "edits resolved");
        self.replace_content(&mut state, candidate, ctx)
    }

    /// Everything is computed against the candidate before any field is
    /// assigned: a failed or cancelled analysis leaves the session as it was.
    fn replace_content(
        &self,
        state: &mut SessionState,
        candidate: String,
        ctx: &SnapshotContext<'_>,
    ) -> Result<ContentUpdate, SessionError> {
        let previous_generation = state.generation;

        if candidate == state.current {
            let snapshot = self.snapshot_locked(state, ctx)?;
            return Ok(ContentUpdate {
                changed: false,
                previous_generation,
                generation: previous_generation,
                changed_lines: Vec::new(),
                snapshot,
            });
        }

        if ctx.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        let changed_lines = position::changed_lines(&state.current, &candidate);
        let tree = self.next_tree(state, &candidate, ctx.analyzer)?;
        let report = ctx.analyzer.analyze(
            &[SourceDocument::new(&self.file_path, &candidate).with_tree(tree.parsed())],
            ctx.max_diagnostics,
            ctx.cancel,
        )?;
        if ctx.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        state.current_hash = ContentHash::of(&candidate);
        state.current = candidate;
        state.generation += 1;
        state.tree = tree;

        debug!(
            session = %self.id,
            generation = state.generation,
            changed_lines = changed_lines.len(),
            "content updated"
        );

        Ok(ContentUpdate {
            changed: true,
            previous_generation,
            generation: state.generation,
            changed_lines,
            snapshot: build_snapshot(state, report),
        })
    }

    /// Tree for `candidate`: incremental when a tree exists, full parse
    /// otherwise or when the incremental pass fails.
    fn next_tree(
        &self,
        state: &SessionState,
        candidate: &str,
        analyzer: &dyn Analyzer,
    ) -> Result<TreeState, AnalysisError> {
        let previous = match &state.tree {
            TreeState::Parsed(tree) => tree,
            TreeState::Unsupported => return Ok(TreeState::Unsupported),
            TreeState::Unparsed => return TreeState::parse(analyzer, &self.file_path, candidate),
        };

        let Some(change) = TextChange::between(&state.current, candidate) else {
            return Ok(TreeState::Parsed(previous.clone()));
        };

        match analyzer.reparse(previous, &change, candidate) {
            Ok(tree) => Ok(TreeState::Parsed(tree)),
            Err(err) => {
                debug!(session = %self.id, %err, "incremental reparse failed; parsing from scratch");
                TreeState::parse(analyzer, &self.file_path, candidate)
            }
        }
    }

    /// Line comparison of original against current content.
    pub fn build_diff(&self, max_changes: usize) -> DiffResult {
        let state = self.state.lock();
        diff::build_diff(&state.original, &state.current, max_changes)
    }

    pub fn unified_diff(&self) -> String {
        let state = self.state.lock();
        let label = self.file_path.display().to_string();
        diff::unified_diff(&label, &state.original, &state.current)
    }

    pub fn snapshot(&self, ctx: &SnapshotContext<'_>) -> Result<Snapshot, SessionError> {
        let mut state = self.state.lock();
        self.snapshot_locked(&mut state, ctx)
    }

    fn snapshot_locked(
        &self,
        state: &mut SessionState,
        ctx: &SnapshotContext<'_>,
    ) -> Result<Snapshot, SessionError> {
        if matches!(state.tree, TreeState::Unparsed) {
            state.tree = TreeState::parse(ctx.analyzer, &self.file_path, &state.current)?;
        }

        let report = ctx.analyzer.analyze(
            &[SourceDocument::new(&self.file_path, &state.current).with_tree(state.tree.parsed())],
            ctx.max_diagnostics,
            ctx.cancel,
        )?;
        Ok(build_snapshot(state, report))
    }

    /// Re-read the file and classify it against the session's hashes.
    pub fn status(&self) -> Result<StatusReport, SessionError> {
        let state = self.state.lock();
        let disk = read_disk_hash(&self.file_path)?;
        let sync_state = sync::classify(&state.sync_inputs(disk.as_ref()));

        Ok(StatusReport {
            sync_state,
            recommended_action: sync_state.recommended_action(),
            disk_exists: disk.is_some(),
            has_changes: state.has_changes(),
            generation: state.generation,
            open_disk_hash_prefix: state.open_disk_hash.prefix().to_string(),
            current_hash_prefix: state.current_hash.prefix().to_string(),
            disk_hash_prefix: disk.as_ref().map(|h| h.prefix().to_string()),
            committed_hash_prefix: state
                .committed_disk_hash
                .as_ref()
                .map(|h| h.prefix().to_string()),
        })
    }

    /// Write the current content over the file.
    ///
    /// Refused with [`SessionError::CommitConflict`] when the file holds
    /// bytes this session never read nor wrote, unless `override_conflict`.
    /// Original content and generation are left as they are.
    pub fn commit(&self, override_conflict: bool) -> Result<CommitOutcome, SessionError> {
        let mut state = self.state.lock();
        let disk = read_disk_hash(&self.file_path)?;
        let inputs = state.sync_inputs(disk.as_ref());
        let previous_state = sync::classify(&inputs);
        let clobbers = inputs.commit_would_clobber();

        if clobbers && !override_conflict {
            warn!(session = %self.id, state = %previous_state, "commit refused");
            return Err(SessionError::CommitConflict {
                state: previous_state,
            });
        }

        edit::atomic_write(&self.file_path, state.current.as_bytes()).map_err(|source| {
            SessionError::Write {
                path: self.file_path.clone(),
                source,
            }
        })?;
        state.committed_disk_hash = Some(state.current_hash.clone());

        info!(
            session = %self.id,
            path = %self.file_path.display(),
            generation = state.generation,
            overridden = clobbers,
            "session committed"
        );

        Ok(CommitOutcome {
            previous_state,
            overridden: clobbers,
            bytes_written: state.current.len(),
            content_hash: state.current_hash.to_string(),
        })
    }
}

fn check_generation(state: &SessionState, expected: Option<u64>) -> Result<(), SessionError> {
    match expected {
        Some(expected) if expected != state.generation => Err(SessionError::GenerationConflict {
            expected,
            actual: state.generation,
        }),
        _ => Ok(()),
    }
}

fn build_snapshot(state: &SessionState, diagnostics: AnalysisReport) -> Snapshot {
    Snapshot {
        generation: state.generation,
        line_count: position::line_count(&state.current),
        char_count: state.current.chars().count(),
        has_changes: state.has_changes(),
        content_hash: state.current_hash.to_string(),
        diagnostics,
    }
}

/// Hash of the file as it is now, `None` if it no longer exists.
fn read_disk_hash(path: &Path) -> Result<Option<ContentHash>, SessionError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(ContentHash::of_bytes(&bytes))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(SessionError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::SyntaxAnalyzer;
    use tempfile::TempDir;

    const FIVE_LINES: &str = "alpha\nbeta\ngamma\ndelta\nepsilon\n";

    struct Fixture {
        _dir: TempDir,
        path: PathBuf,
        analyzer: SyntaxAnalyzer,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new(name: &str, content: &str) -> Self {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join(name);
            fs::write(&path, content).unwrap();
            Self {
                _dir: dir,
                path,
                analyzer: SyntaxAnalyzer::new(),
                cancel: CancellationToken::new(),
            }
        }

        fn ctx(&self) -> SnapshotContext<'_> {
            SnapshotContext::new(&self.analyzer, 50, &self.cancel)
        }

        fn open(&self) -> DocumentSession {
            DocumentSession::open("s1", &self.path).unwrap()
        }
    }

    #[test]
    fn open_starts_at_generation_zero() {
        let fx = Fixture::new("notes.txt", FIVE_LINES);
        let session = fx.open();
        let overview = session.overview();
        assert_eq!(overview.generation, 0);
        assert_eq!(overview.line_count, 6);
        assert!(!overview.has_changes);
    }

    #[test]
    fn open_missing_file_is_not_found() {
        let fx = Fixture::new("notes.txt", "");
        let err = DocumentSession::open("s1", fx.path.with_file_name("nope.txt")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn single_line_edit_bumps_generation_once() {
        let fx = Fixture::new("notes.txt", FIVE_LINES);
        let session = fx.open();

        let update = session
            .apply_text_edits(&[TextEdit::new((3, 1), (3, 6), "GAMMA")], Some(0), &fx.ctx())
            .unwrap();

        assert!(update.changed);
        assert_eq!(update.generation, 1);
        assert_eq!(update.changed_lines, vec![3]);
        assert_eq!(fs::read_to_string(&fx.path).unwrap(), FIVE_LINES);
    }

    #[test]
    fn identical_content_is_a_no_op() {
        let fx = Fixture::new("notes.txt", FIVE_LINES);
        let session = fx.open();

        let update = session
            .set_content(FIVE_LINES.to_string(), None, &fx.ctx())
            .unwrap();
        assert!(!update.changed);
        assert_eq!(update.generation, 0);
        assert!(update.changed_lines.is_empty());
    }

    #[test]
    fn stale_generation_is_rejected_without_mutation() {
        let fx = Fixture::new("notes.txt", FIVE_LINES);
        let session = fx.open();
        session.set_content("one\n".into(), Some(0), &fx.ctx()).unwrap();

        let err = session
            .set_content("two\n".into(), Some(0), &fx.ctx())
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::GenerationConflict {
                expected: 0,
                actual: 1
            }
        ));
        assert_eq!(session.current_content(), "one\n");
    }

    #[test]
    fn overlapping_edits_leave_content_alone() {
        let fx = Fixture::new("notes.txt", FIVE_LINES);
        let session = fx.open();
        let edits = [
            TextEdit::new((1, 1), (2, 3), "x"),
            TextEdit::new((2, 1), (2, 2), "y"),
        ];

        let err = session.apply_text_edits(&edits, None, &fx.ctx()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(session.generation(), 0);
        assert_eq!(session.current_content(), FIVE_LINES);
    }

    #[test]
    fn cancelled_mutation_changes_nothing() {
        let fx = Fixture::new("notes.txt", FIVE_LINES);
        let session = fx.open();
        fx.cancel.cancel();

        let err = session
            .set_content("other\n".into(), None, &fx.ctx())
            .unwrap_err();
        assert!(matches!(err, SessionError::Cancelled));
        assert_eq!(session.generation(), 0);
    }

    #[test]
    fn snapshot_reports_syntax_errors_after_edit() {
        let fx = Fixture::new("lib.rs", "fn main() {}\n");
        let session = fx.open();
        assert!(session.snapshot(&fx.ctx()).unwrap().diagnostics.is_clean());

        let update = session
            .apply_text_edits(&[TextEdit::new((1, 12), (1, 13), "")], None, &fx.ctx())
            .unwrap();
        assert!(update.snapshot.diagnostics.error_count > 0);
    }

    #[test]
    fn diff_without_mutation_is_empty() {
        let fx = Fixture::new("notes.txt", FIVE_LINES);
        let session = fx.open();
        assert_eq!(session.build_diff(10).total_changed_lines, 0);
    }

    #[test]
    fn commit_writes_and_keeps_generation() {
        let fx = Fixture::new("notes.txt", FIVE_LINES);
        let session = fx.open();
        session.set_content("new\n".into(), None, &fx.ctx()).unwrap();

        let outcome = session.commit(false).unwrap();
        assert_eq!(outcome.previous_state, SyncState::InMemoryChanges);
        assert_eq!(fs::read_to_string(&fx.path).unwrap(), "new\n");
        assert_eq!(session.generation(), 1);
        assert_eq!(session.original_content(), FIVE_LINES);
        assert_eq!(
            session.status().unwrap().sync_state,
            SyncState::CommittedNotClosed
        );
    }

    #[test]
    fn commit_refuses_to_clobber_external_write() {
        let fx = Fixture::new("notes.txt", FIVE_LINES);
        let session = fx.open();
        session.set_content("mine\n".into(), None, &fx.ctx()).unwrap();
        fs::write(&fx.path, "theirs\n").unwrap();

        let err = session.commit(false).unwrap_err();
        assert!(matches!(
            err,
            SessionError::CommitConflict {
                state: SyncState::Diverged
            }
        ));
        assert_eq!(fs::read_to_string(&fx.path).unwrap(), "theirs\n");

        let outcome = session.commit(true).unwrap();
        assert!(outcome.overridden);
        assert_eq!(fs::read_to_string(&fx.path).unwrap(), "mine\n");
    }

    #[test]
    fn record_round_trips_through_from_record() {
        let fx = Fixture::new("notes.txt", FIVE_LINES);
        let session = fx.open();
        session.set_content("x\n".into(), None, &fx.ctx()).unwrap();

        let restored = DocumentSession::from_record(session.record());
        assert_eq!(restored.generation(), 1);
        assert_eq!(restored.current_content(), "x\n");
        assert_eq!(restored.original_content(), FIVE_LINES);
        assert_eq!(restored.overview(), session.overview());
    }
}
