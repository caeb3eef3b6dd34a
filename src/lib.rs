//! Edit Session: versioned editing sessions and atomic multi-file edits
//!
//! An automated caller opens a document once and then edits it in memory
//! through a [`DocumentSession`], without re-reading or re-writing the file
//! on every step. Each session carries a generation counter: callers pass
//! the generation they last saw, and a stale caller gets a
//! [`SessionError::GenerationConflict`] instead of silently clobbering a
//! newer edit. Every mutation is checked right away by an [`Analyzer`].
//!
//! # Architecture
//!
//! - [`position`] turns 1-based `(line, column)` pairs into byte offsets.
//! - [`session`] owns one document: content, generation, commit and the
//!   disk-sync classification.
//! - [`store`] keeps sessions across processes as one JSON record each.
//! - [`transaction`] applies ordered span and content edits over several
//!   files, writing all of them or none.
//! - [`commands`] is the request/response surface the CLI drives.
//!
//! # Safety
//!
//! - Whole-file writes go through tempfile + fsync + rename
//! - Commits refuse to overwrite changes made behind the session's back
//! - Optional workspace confinement for every touched path
//! - UTF-8 validation on every read
//!
//! # Example
//!
//! ```no_run
//! use edit_session::{
//!     CancellationToken, DocumentSession, SnapshotContext, SyntaxAnalyzer, TextEdit,
//! };
//!
//! let session = DocumentSession::open("demo", "src/main.rs")?;
//! let analyzer = SyntaxAnalyzer::new();
//! let cancel = CancellationToken::new();
//! let ctx = SnapshotContext::new(&analyzer, 20, &cancel);
//!
//! let update = session.apply_text_edits(
//!     &[TextEdit::new((1, 1), (1, 1), "// generated\n")],
//!     Some(0),
//!     &ctx,
//! )?;
//! println!("now at generation {}", update.generation);
//! session.commit(false)?;
//! # Ok::<(), edit_session::SessionError>(())
//! ```

pub mod analysis;
pub mod cancel;
pub mod commands;
pub mod edit;
pub mod error;
pub mod hash;
pub mod position;
pub mod session;
pub mod settings;
pub mod store;
pub mod transaction;
pub mod workspace;

// Re-exports
pub use analysis::{AnalysisReport, Analyzer, Diagnostic, Severity, SyntaxAnalyzer};
pub use cancel::CancellationToken;
pub use commands::{CommandError, SessionCommands};
pub use edit::{EditError, TextEdit};
pub use error::ErrorKind;
pub use hash::ContentHash;
pub use position::PositionError;
pub use session::{
    ContentUpdate, DiffResult, DocumentSession, SessionError, Snapshot, SnapshotContext,
    StatusReport, SyncState,
};
pub use settings::{Settings, SettingsError};
pub use store::{SessionRecord, SessionStore, StoreError};
pub use transaction::{EditOperation, TransactionEngine, TransactionError, TransactionResult};
pub use workspace::{WorkspaceError, WorkspaceGuard};
