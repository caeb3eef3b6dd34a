//! Versioned in-memory editing sessions.

pub mod diff;
mod document;
pub mod sync;

pub use diff::{DiffResult, LineChange};
pub use document::{
    CommitOutcome, ContentUpdate, DocumentSession, SessionError, SessionOverview, Snapshot,
    SnapshotContext, StatusReport,
};
pub use sync::SyncState;
