//! Disk-synchronization classification.
//!
//! Three hashes describe a session against its file: the bytes seen at
//! open time, the in-memory content, and the bytes on disk right now. The
//! hash written by the session's last commit also counts as "seen", so a
//! session that commits and keeps editing is not mistaken for a conflict.
//!
//! Classification is an ordered rule table; the first matching rule wins.
//! `Diverged` must stay ahead of the `DiskChangedExternal` and
//! `CommittedNotClosed` rules: it is the only three-way conflict.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    MissingOnDisk,
    Diverged,
    DiskChangedExternal,
    CommittedNotClosed,
    InMemoryChanges,
    InSync,
}

impl SyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::MissingOnDisk => "missing_on_disk",
            SyncState::Diverged => "diverged",
            SyncState::DiskChangedExternal => "disk_changed_external",
            SyncState::CommittedNotClosed => "committed_not_closed",
            SyncState::InMemoryChanges => "in_memory_changes",
            SyncState::InSync => "in_sync",
        }
    }

    pub fn recommended_action(self) -> &'static str {
        match self {
            SyncState::MissingOnDisk => "restore the file or close the session without committing",
            SyncState::Diverged => {
                "review the diff, then commit with override or close and reopen"
            }
            SyncState::DiskChangedExternal => "close and reopen before further edits",
            SyncState::CommittedNotClosed => "close the session, or continue editing",
            SyncState::InMemoryChanges => "diff or diagnose, then commit or close",
            SyncState::InSync => "safe to continue",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hashes compared by the classifier.
#[derive(Debug, Clone, Copy)]
pub struct SyncInputs<'a> {
    pub open: &'a ContentHash,
    pub current: &'a ContentHash,
    pub committed: Option<&'a ContentHash>,
    /// `None` when the file no longer exists
    pub disk: Option<&'a ContentHash>,
}

impl SyncInputs<'_> {
    pub fn has_changes(&self) -> bool {
        self.current != self.open
    }

    /// Disk holds bytes this session never read nor wrote.
    pub fn disk_is_external(&self) -> bool {
        match self.disk {
            Some(disk) => disk != self.open && self.committed != Some(disk),
            None => false,
        }
    }

    pub fn disk_matches_current(&self) -> bool {
        self.disk == Some(self.current)
    }

    /// Writing now would overwrite content nobody in this session has seen.
    pub fn commit_would_clobber(&self) -> bool {
        self.disk_is_external() && !self.disk_matches_current()
    }
}

type Rule = (SyncState, fn(&SyncInputs<'_>) -> bool);

fn missing(s: &SyncInputs<'_>) -> bool {
    s.disk.is_none()
}

fn diverged(s: &SyncInputs<'_>) -> bool {
    s.disk_is_external() && s.has_changes() && !s.disk_matches_current()
}

fn changed_externally(s: &SyncInputs<'_>) -> bool {
    s.disk_is_external() && !s.has_changes()
}

fn committed(s: &SyncInputs<'_>) -> bool {
    s.disk_matches_current() && s.has_changes()
}

fn unwritten(s: &SyncInputs<'_>) -> bool {
    s.has_changes() || !s.disk_matches_current()
}

const RULES: &[Rule] = &[
    (SyncState::MissingOnDisk, missing),
    (SyncState::Diverged, diverged),
    (SyncState::DiskChangedExternal, changed_externally),
    (SyncState::CommittedNotClosed, committed),
    (SyncState::InMemoryChanges, unwritten),
];

pub fn classify(inputs: &SyncInputs<'_>) -> SyncState {
    RULES
        .iter()
        .find(|(_, applies)| applies(inputs))
        .map_or(SyncState::InSync, |(state, _)| *state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(text: &str) -> ContentHash {
        ContentHash::of(text)
    }

    fn classify_texts(
        open: &str,
        current: &str,
        committed: Option<&str>,
        disk: Option<&str>,
    ) -> SyncState {
        let (open, current) = (h(open), h(current));
        let committed = committed.map(h);
        let disk = disk.map(h);
        classify(&SyncInputs {
            open: &open,
            current: &current,
            committed: committed.as_ref(),
            disk: disk.as_ref(),
        })
    }

    #[test]
    fn untouched_session_is_in_sync() {
        assert_eq!(classify_texts("a", "a", None, Some("a")), SyncState::InSync);
    }

    #[test]
    fn missing_file_wins_over_everything() {
        assert_eq!(classify_texts("a", "b", None, None), SyncState::MissingOnDisk);
    }

    #[test]
    fn in_memory_edit_only() {
        assert_eq!(
            classify_texts("a", "b", None, Some("a")),
            SyncState::InMemoryChanges
        );
    }

    #[test]
    fn external_write_without_edits() {
        assert_eq!(
            classify_texts("a", "a", None, Some("x")),
            SyncState::DiskChangedExternal
        );
    }

    #[test]
    fn external_write_with_edits_diverges() {
        assert_eq!(classify_texts("a", "b", None, Some("x")), SyncState::Diverged);
    }

    #[test]
    fn external_write_matching_memory_is_committed() {
        // Someone else wrote exactly our content: nothing to reconcile.
        assert_eq!(
            classify_texts("a", "b", None, Some("b")),
            SyncState::CommittedNotClosed
        );
    }

    #[test]
    fn commit_then_continue_editing_is_not_a_conflict() {
        assert_eq!(
            classify_texts("a", "c", Some("b"), Some("b")),
            SyncState::InMemoryChanges
        );
    }

    #[test]
    fn commit_then_revert_to_original_needs_a_write() {
        assert_eq!(
            classify_texts("a", "a", Some("b"), Some("b")),
            SyncState::InMemoryChanges
        );
    }

    #[test]
    fn clobber_guard_matches_conflict_states() {
        let (open, current, disk) = (h("a"), h("b"), h("x"));
        let inputs = SyncInputs {
            open: &open,
            current: &current,
            committed: None,
            disk: Some(&disk),
        };
        assert!(inputs.commit_would_clobber());

        let inputs = SyncInputs {
            disk: Some(&open),
            ..inputs
        };
        assert!(!inputs.commit_would_clobber());
    }
}
