//! Request/response surface over sessions, the store and transactions.
//!
//! Every request and response is a serde type, so the CLI (or any other
//! front end) only has to move JSON in and out. Failures carry a stable
//! snake_case [`CommandError::code`].

use crate::analysis::{AnalysisReport, Analyzer, SyntaxAnalyzer};
use crate::cancel::CancellationToken;
use crate::edit::TextEdit;
use crate::error::ErrorKind;
use crate::session::{
    CommitOutcome, ContentUpdate, DiffResult, DocumentSession, SessionError, SessionOverview,
    SnapshotContext, StatusReport,
};
use crate::settings::{Settings, SettingsError};
use crate::store::{self, SessionStore, StoreError};
use crate::transaction::{EditOperation, TransactionEngine, TransactionError, TransactionResult};
use crate::workspace::{WorkspaceError, WorkspaceGuard};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenRequest {
    pub file_path: PathBuf,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetContentRequest {
    pub session_id: String,
    pub new_content: String,
    #[serde(default)]
    pub expected_generation: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplyTextEditsRequest {
    pub session_id: String,
    pub edits: Vec<TextEdit>,
    #[serde(default)]
    pub expected_generation: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiffRequest {
    pub session_id: String,
    #[serde(default)]
    pub max_changes: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusRequest {
    pub session_id: String,
    #[serde(default)]
    pub include_diagnostics: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitRequest {
    pub session_id: String,
    #[serde(default = "default_true")]
    pub keep_session: bool,
    #[serde(default)]
    pub override_conflict: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionRequest {
    pub operations: Vec<EditOperation>,
    #[serde(default = "default_true")]
    pub apply: bool,
    #[serde(default)]
    pub max_diagnostics: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateResult {
    #[serde(flatten)]
    pub update: ContentUpdate,
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    #[serde(flatten)]
    pub status: StatusReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<AnalysisReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitResult {
    pub session_id: String,
    pub file_path: PathBuf,
    #[serde(flatten)]
    pub outcome: CommitOutcome,
    pub closed: bool,
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CloseResult {
    pub session_id: String,
    pub closed: bool,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("session {id} not found")]
    SessionNotFound { id: String },

    #[error("session {id} already exists")]
    SessionExists { id: String },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl CommandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::SessionNotFound { .. } => ErrorKind::NotFound,
            CommandError::SessionExists { .. } => ErrorKind::Conflict,
            CommandError::Session(err) => err.kind(),
            CommandError::Store(err) => err.kind(),
            CommandError::Transaction(err) => err.kind(),
            CommandError::Workspace(err) => err.kind(),
            CommandError::Settings(err) => err.kind(),
        }
    }

    /// Stable identifier for the wire.
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::SessionNotFound { .. } => "session_not_found",
            CommandError::SessionExists { .. } => "session_exists",
            CommandError::Session(SessionError::GenerationConflict { .. }) => {
                "generation_conflict"
            }
            CommandError::Session(SessionError::InvalidEdits(_)) => "invalid_edits",
            CommandError::Session(SessionError::CommitConflict { .. }) => "commit_conflict",
            CommandError::Workspace(
                WorkspaceError::OutsideWorkspace { .. } | WorkspaceError::Forbidden { .. },
            ) => "outside_workspace",
            other => match other.kind() {
                ErrorKind::NotFound => "file_not_found",
                ErrorKind::Conflict => "conflict",
                ErrorKind::InvalidInput => "invalid_input",
                ErrorKind::Io => "io_error",
                ErrorKind::Analysis => "analysis_failed",
                ErrorKind::Cancelled => "cancelled",
            },
        }
    }
}

/// Entry point for every session command.
pub struct SessionCommands {
    store: SessionStore,
    analyzer: Arc<dyn Analyzer>,
    settings: Settings,
    guard: Option<WorkspaceGuard>,
}

impl SessionCommands {
    pub fn new(settings: Settings, analyzer: Arc<dyn Analyzer>) -> Result<Self, CommandError> {
        let state_dir = settings.state_dir();
        let guard = match &settings.workspace_root {
            Some(root) => Some(WorkspaceGuard::new(root, &[state_dir.clone()])?),
            None => None,
        };

        Ok(Self {
            store: SessionStore::new(state_dir),
            analyzer,
            settings,
            guard,
        })
    }

    /// Commands using the built-in tree-sitter analyzer.
    pub fn with_syntax_analyzer(settings: Settings) -> Result<Self, CommandError> {
        Self::new(settings, Arc::new(SyntaxAnalyzer::new()))
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn session(&self, id: &str) -> Result<Arc<DocumentSession>, CommandError> {
        self.store
            .try_get(id)?
            .ok_or_else(|| CommandError::SessionNotFound { id: id.to_string() })
    }

    fn resolve_path(&self, path: &Path) -> Result<PathBuf, CommandError> {
        let resolved = match &self.guard {
            Some(guard) => guard.resolve(path)?,
            None => path.canonicalize().map_err(|source| WorkspaceError::Resolve {
                path: path.to_path_buf(),
                source,
            })?,
        };
        Ok(resolved)
    }

    fn snapshot_context<'a>(&'a self, cancel: &'a CancellationToken) -> SnapshotContext<'a> {
        SnapshotContext::new(self.analyzer.as_ref(), self.settings.max_diagnostics, cancel)
    }

    /// Persist after a mutation; failure is reported, not raised.
    fn persist(&self, session: &DocumentSession) -> (bool, Option<String>) {
        match self.store.persist(session) {
            Ok(()) => (true, None),
            Err(err) => {
                warn!(session = %session.id(), %err, "failed to persist session");
                (false, Some(err.to_string()))
            }
        }
    }

    pub fn open(&self, request: OpenRequest) -> Result<SessionOverview, CommandError> {
        let path = self.resolve_path(&request.file_path)?;
        let id = match request.session_id {
            Some(id) => {
                store::validate_id(&id)?;
                id
            }
            None => SessionStore::create_id(),
        };

        if self.store.try_get(&id)?.is_some() {
            return Err(CommandError::SessionExists { id });
        }

        let session = Arc::new(DocumentSession::open(id.clone(), path)?);
        if !self.store.try_add(Arc::clone(&session))? {
            return Err(CommandError::SessionExists { id });
        }
        Ok(session.overview())
    }

    pub fn set_content(
        &self,
        request: SetContentRequest,
        cancel: &CancellationToken,
    ) -> Result<UpdateResult, CommandError> {
        let session = self.session(&request.session_id)?;
        let update = session.set_content(
            request.new_content,
            request.expected_generation,
            &self.snapshot_context(cancel),
        )?;
        Ok(self.finish_update(&session, update))
    }

    pub fn apply_text_edits(
        &self,
        request: ApplyTextEditsRequest,
        cancel: &CancellationToken,
    ) -> Result<UpdateResult, CommandError> {
        let session = self.session(&request.session_id)?;
        let update = session.apply_text_edits(
            &request.edits,
            request.expected_generation,
            &self.snapshot_context(cancel),
        )?;
        Ok(self.finish_update(&session, update))
    }

    fn finish_update(&self, session: &DocumentSession, update: ContentUpdate) -> UpdateResult {
        let (persisted, persist_error) = if update.changed {
            self.persist(session)
        } else {
            (true, None)
        };
        UpdateResult {
            update,
            persisted,
            persist_error,
        }
    }

    pub fn diff(&self, request: DiffRequest) -> Result<DiffResult, CommandError> {
        let max_changes = request
            .max_changes
            .unwrap_or(self.settings.max_diff_changes);
        Ok(self.session(&request.session_id)?.build_diff(max_changes))
    }

    /// Unified diff text of the session against its original content.
    pub fn unified_diff(&self, session_id: &str) -> Result<String, CommandError> {
        Ok(self.session(session_id)?.unified_diff())
    }

    pub fn status(
        &self,
        request: StatusRequest,
        cancel: &CancellationToken,
    ) -> Result<StatusResult, CommandError> {
        let session = self.session(&request.session_id)?;
        let status = session.status()?;
        let diagnostics = if request.include_diagnostics {
            Some(session.snapshot(&self.snapshot_context(cancel))?.diagnostics)
        } else {
            None
        };
        Ok(StatusResult {
            status,
            diagnostics,
        })
    }

    pub fn commit(&self, request: CommitRequest) -> Result<CommitResult, CommandError> {
        let session = self.session(&request.session_id)?;
        if let Some(guard) = &self.guard {
            guard.recheck(session.file_path())?;
        }
        let override_conflict =
            request.override_conflict || !self.settings.commit.require_override_on_conflict;
        let outcome = session.commit(override_conflict)?;

        let (closed, persisted, persist_error) = if request.keep_session {
            let (persisted, persist_error) = self.persist(&session);
            (false, persisted, persist_error)
        } else {
            self.store.try_remove(session.id())?;
            info!(session = %session.id(), "session closed after commit");
            (true, true, None)
        };

        Ok(CommitResult {
            session_id: session.id().to_string(),
            file_path: session.file_path().to_path_buf(),
            outcome,
            closed,
            persisted,
            persist_error,
        })
    }

    pub fn close(&self, session_id: &str) -> Result<CloseResult, CommandError> {
        if !self.store.try_remove(session_id)? {
            return Err(CommandError::SessionNotFound {
                id: session_id.to_string(),
            });
        }
        info!(session = %session_id, "session closed");
        Ok(CloseResult {
            session_id: session_id.to_string(),
            closed: true,
        })
    }

    pub fn list(&self) -> Result<Vec<SessionOverview>, CommandError> {
        Ok(self.store.list()?)
    }

    pub fn transaction(
        &self,
        request: TransactionRequest,
        cancel: &CancellationToken,
    ) -> Result<TransactionResult, CommandError> {
        let max_diagnostics = request
            .max_diagnostics
            .unwrap_or(self.settings.max_diagnostics);
        let result = TransactionEngine::new(self.analyzer.as_ref(), cancel)
            .with_guard(self.guard.as_ref())
            .run(&request.operations, request.apply, max_diagnostics)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SyncState;
    use std::fs;
    use tempfile::TempDir;

    struct Harness {
        dir: TempDir,
        commands: SessionCommands,
        cancel: CancellationToken,
    }

    impl Harness {
        fn new() -> Self {
            Self::with(|_| {})
        }

        fn with(configure: impl FnOnce(&mut Settings)) -> Self {
            let dir = TempDir::new().unwrap();
            let mut settings = Settings {
                state_dir: Some(dir.path().join("state")),
                ..Settings::default()
            };
            configure(&mut settings);
            let commands = SessionCommands::with_syntax_analyzer(settings).unwrap();
            Self {
                dir,
                commands,
                cancel: CancellationToken::new(),
            }
        }

        fn file(&self, name: &str, content: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            fs::write(&path, content).unwrap();
            path
        }

        fn open(&self, path: &Path, id: &str) -> SessionOverview {
            self.commands
                .open(OpenRequest {
                    file_path: path.to_path_buf(),
                    session_id: Some(id.to_string()),
                })
                .unwrap()
        }

        fn set(&self, id: &str, content: &str, expected: Option<u64>) -> UpdateResult {
            self.commands
                .set_content(
                    SetContentRequest {
                        session_id: id.to_string(),
                        new_content: content.to_string(),
                        expected_generation: expected,
                    },
                    &self.cancel,
                )
                .unwrap()
        }
    }

    #[test]
    fn open_twice_with_same_id_fails() {
        let h = Harness::new();
        let path = h.file("a.txt", "x\n");
        h.open(&path, "s1");

        let err = h
            .commands
            .open(OpenRequest {
                file_path: path,
                session_id: Some("s1".into()),
            })
            .unwrap_err();
        assert_eq!(err.code(), "session_exists");
    }

    #[test]
    fn open_missing_file_reports_file_not_found() {
        let h = Harness::new();
        let err = h
            .commands
            .open(OpenRequest {
                file_path: h.dir.path().join("missing.txt"),
                session_id: None,
            })
            .unwrap_err();
        assert_eq!(err.code(), "file_not_found");
    }

    #[test]
    fn invalid_id_is_invalid_input() {
        let h = Harness::new();
        let path = h.file("a.txt", "x\n");
        let err = h
            .commands
            .open(OpenRequest {
                file_path: path,
                session_id: Some("../../etc".into()),
            })
            .unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn mutations_are_persisted() {
        let h = Harness::new();
        let path = h.file("a.txt", "x\n");
        h.open(&path, "s1");

        let result = h.set("s1", "y\n", Some(0));
        assert!(result.persisted);
        assert!(result.persist_error.is_none());

        let reloaded = SessionStore::new(h.dir.path().join("state"))
            .try_get("s1")
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.generation(), 1);
    }

    #[test]
    fn generation_conflict_code() {
        let h = Harness::new();
        let path = h.file("a.txt", "x\n");
        h.open(&path, "s1");
        h.set("s1", "y\n", None);

        let err = h
            .commands
            .set_content(
                SetContentRequest {
                    session_id: "s1".into(),
                    new_content: "z\n".into(),
                    expected_generation: Some(0),
                },
                &h.cancel,
            )
            .unwrap_err();
        assert_eq!(err.code(), "generation_conflict");
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn commit_without_keep_closes_session() {
        let h = Harness::new();
        let path = h.file("a.txt", "x\n");
        h.open(&path, "s1");
        h.set("s1", "y\n", None);

        let result = h
            .commands
            .commit(CommitRequest {
                session_id: "s1".into(),
                keep_session: false,
                override_conflict: false,
            })
            .unwrap();
        assert!(result.closed);
        assert_eq!(fs::read_to_string(&path).unwrap(), "y\n");
        assert_eq!(
            h.commands.close("s1").unwrap_err().code(),
            "session_not_found"
        );
    }

    #[test]
    fn commit_guard_can_be_disabled_in_settings() {
        let h = Harness::with(|s| s.commit.require_override_on_conflict = false);
        let path = h.file("a.txt", "x\n");
        h.open(&path, "s1");
        h.set("s1", "mine\n", None);
        fs::write(&path, "theirs\n").unwrap();

        let result = h
            .commands
            .commit(CommitRequest {
                session_id: "s1".into(),
                keep_session: true,
                override_conflict: false,
            })
            .unwrap();
        assert_eq!(result.outcome.previous_state, SyncState::Diverged);
        assert!(result.outcome.overridden);
        assert_eq!(fs::read_to_string(&path).unwrap(), "mine\n");
    }

    #[test]
    fn status_can_include_diagnostics() {
        let h = Harness::new();
        let path = h.file("lib.rs", "fn main() {\n");
        h.open(&path, "s1");

        let status = h
            .commands
            .status(
                StatusRequest {
                    session_id: "s1".into(),
                    include_diagnostics: true,
                },
                &h.cancel,
            )
            .unwrap();
        assert_eq!(status.status.sync_state, SyncState::InSync);
        assert!(status.diagnostics.unwrap().error_count > 0);
    }

    #[test]
    fn workspace_root_confines_open() {
        let h = Harness::new();
        let workspace = h.dir.path().join("ws");
        fs::create_dir_all(&workspace).unwrap();
        let outside = h.file("outside.txt", "x\n");

        let mut settings = h.commands.settings().clone();
        settings.workspace_root = Some(workspace);
        let confined = SessionCommands::with_syntax_analyzer(settings).unwrap();

        let err = confined
            .open(OpenRequest {
                file_path: outside,
                session_id: None,
            })
            .unwrap_err();
        assert_eq!(err.code(), "outside_workspace");
    }

    fn confined(h: &Harness) -> (SessionCommands, PathBuf) {
        let workspace = h.dir.path().join("ws");
        fs::create_dir_all(&workspace).unwrap();
        let mut settings = h.commands.settings().clone();
        settings.workspace_root = Some(workspace.clone());
        (SessionCommands::with_syntax_analyzer(settings).unwrap(), workspace)
    }

    #[test]
    #[cfg(unix)]
    fn commit_rechecks_workspace_before_writing() {
        let h = Harness::new();
        let (commands, workspace) = confined(&h);
        let inside = workspace.join("a.txt");
        fs::write(&inside, "x\n").unwrap();
        let outside = h.file("outside.txt", "untouched\n");

        commands
            .open(OpenRequest {
                file_path: inside.clone(),
                session_id: Some("s1".into()),
            })
            .unwrap();

        fs::remove_file(&inside).unwrap();
        std::os::unix::fs::symlink(&outside, &inside).unwrap();

        let err = commands
            .commit(CommitRequest {
                session_id: "s1".into(),
                keep_session: true,
                override_conflict: true,
            })
            .unwrap_err();
        assert_eq!(err.code(), "outside_workspace");
        assert_eq!(fs::read_to_string(&outside).unwrap(), "untouched\n");
    }

    #[test]
    fn guarded_commit_restores_deleted_file() {
        let h = Harness::new();
        let (commands, workspace) = confined(&h);
        let inside = workspace.join("a.txt");
        fs::write(&inside, "keep\n").unwrap();
        commands
            .open(OpenRequest {
                file_path: inside.clone(),
                session_id: Some("s1".into()),
            })
            .unwrap();

        fs::remove_file(&inside).unwrap();
        let result = commands
            .commit(CommitRequest {
                session_id: "s1".into(),
                keep_session: true,
                override_conflict: false,
            })
            .unwrap();
        assert_eq!(result.outcome.previous_state, SyncState::MissingOnDisk);
        assert_eq!(fs::read_to_string(&inside).unwrap(), "keep\n");
    }

    #[test]
    fn list_shows_open_sessions() {
        let h = Harness::new();
        let path = h.file("a.txt", "x\n");
        h.open(&path, "one");
        h.open(&path, "two");
        h.set("two", "changed\n", None);

        let listed = h.commands.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert!(!listed[0].has_changes);
        assert!(listed[1].has_changes);
    }
}
