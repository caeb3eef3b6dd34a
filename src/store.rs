//! Session registry backed by one JSON record per session.
//!
//! Live sessions are cached in memory; the record directory is the source
//! of truth across processes, so a fresh store over the same directory
//! reconstructs any session on first access.

use crate::edit::{self, EditError};
use crate::error::{self, ErrorKind};
use crate::hash::ContentHash;
use crate::session::{DocumentSession, SessionOverview};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

pub const RECORD_FORMAT_VERSION: u32 = 1;
pub const RECORD_EXTENSION: &str = "json";
const MAX_ID_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid session id {id:?}: expected 1-{MAX_ID_LEN} characters of [A-Za-z0-9_-]")]
    InvalidId { id: String },

    #[error("I/O error while {operation} at {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write session record {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: EditError,
    },

    #[error("failed to parse session record {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode session record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("session record {} has unsupported format version {found}; expected {RECORD_FORMAT_VERSION}", path.display())]
    UnsupportedVersion { path: PathBuf, found: u32 },
}

impl StoreError {
    fn io(operation: &'static str, path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::InvalidId { .. } => ErrorKind::InvalidInput,
            StoreError::Io { source, .. } => error::io_kind(source),
            StoreError::Write { .. }
            | StoreError::Parse { .. }
            | StoreError::Encode(_)
            | StoreError::UnsupportedVersion { .. } => ErrorKind::Io,
        }
    }
}

fn default_format_version() -> u32 {
    RECORD_FORMAT_VERSION
}

/// On-disk form of a session. The parse tree is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    pub session_id: String,
    pub file_path: PathBuf,
    pub original_content: String,
    pub current_content: String,
    pub open_disk_hash: ContentHash,
    #[serde(default)]
    pub committed_disk_hash: Option<ContentHash>,
    pub generation: u64,
}

impl SessionRecord {
    pub(crate) fn new(
        session_id: &str,
        file_path: &Path,
        original: &str,
        current: &str,
        open_disk_hash: &ContentHash,
        committed_disk_hash: Option<&ContentHash>,
        generation: u64,
    ) -> Self {
        Self {
            format_version: RECORD_FORMAT_VERSION,
            session_id: session_id.to_string(),
            file_path: file_path.to_path_buf(),
            original_content: original.to_string(),
            current_content: current.to_string(),
            open_disk_hash: open_disk_hash.clone(),
            committed_disk_hash: committed_disk_hash.cloned(),
            generation,
        }
    }

    pub fn overview(&self) -> SessionOverview {
        SessionOverview::describe(
            &self.session_id,
            &self.file_path,
            &self.current_content,
            &ContentHash::of(&self.current_content),
            &self.open_disk_hash,
            self.generation,
        )
    }
}

/// Ids are used as file names, so they may not contain path syntax.
pub fn validate_id(id: &str) -> Result<(), StoreError> {
    let valid = (1..=MAX_ID_LEN).contains(&id.len())
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId { id: id.to_string() })
    }
}

pub struct SessionStore {
    root: PathBuf,
    cache: Mutex<HashMap<String, Arc<DocumentSession>>>,
}

impl SessionStore {
    /// Store over `root`; the directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn create_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.{RECORD_EXTENSION}"))
    }

    fn ensure_root(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)
            .map_err(|source| StoreError::io("creating session directory", &self.root, source))
    }

    /// Register a new session and write its first record.
    ///
    /// Returns `false` without touching anything if a session with the same
    /// id is cached or already has a record.
    pub fn try_add(&self, session: Arc<DocumentSession>) -> Result<bool, StoreError> {
        let id = session.id().to_string();
        validate_id(&id)?;

        if self.cache.lock().contains_key(&id) {
            return Ok(false);
        }

        self.ensure_root()?;
        let path = self.record_path(&id);
        let bytes = encode(&session.record())?;
        let created = edit::stage_write(&path, &bytes)
            .and_then(edit::StagedWrite::commit_new)
            .map_err(|source| StoreError::Write {
                path: path.clone(),
                source,
            })?;
        if !created {
            debug!(session = %id, "record already exists");
            return Ok(false);
        }

        self.cache.lock().insert(id, session);
        Ok(true)
    }

    /// Cached session, or one reconstructed from its record.
    pub fn try_get(&self, id: &str) -> Result<Option<Arc<DocumentSession>>, StoreError> {
        validate_id(id)?;

        if let Some(session) = self.cache.lock().get(id) {
            return Ok(Some(Arc::clone(session)));
        }

        let Some(record) = self.load_record(&self.record_path(id))? else {
            return Ok(None);
        };
        let session = Arc::new(DocumentSession::from_record(record));
        debug!(session = %id, "session reconstructed from record");

        let mut cache = self.cache.lock();
        let entry = cache.entry(id.to_string()).or_insert(session);
        Ok(Some(Arc::clone(entry)))
    }

    /// Write the session's current record over the previous one.
    pub fn persist(&self, session: &DocumentSession) -> Result<(), StoreError> {
        validate_id(session.id())?;
        self.ensure_root()?;
        let path = self.record_path(session.id());

        session.persist_with(|record| {
            let bytes = encode(record)?;
            edit::atomic_write(&path, &bytes).map_err(|source| StoreError::Write {
                path: path.clone(),
                source,
            })
        })
    }

    /// Drop the session from the cache and delete its record.
    ///
    /// Returns `true` if either existed.
    pub fn try_remove(&self, id: &str) -> Result<bool, StoreError> {
        validate_id(id)?;
        let cached = self.cache.lock().remove(id).is_some();

        let path = self.record_path(id);
        let on_disk = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(source) => return Err(StoreError::io("removing session record", &path, source)),
        };

        Ok(cached || on_disk)
    }

    /// Every persisted session, sorted by id. Cached sessions report their
    /// in-memory state. Unreadable records are skipped.
    pub fn list(&self) -> Result<Vec<SessionOverview>, StoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let cached: HashMap<String, Arc<DocumentSession>> = self.cache.lock().clone();
        let mut overviews = Vec::new();

        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| {
                let source = err
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::other("directory walk failed"));
                StoreError::io("listing session records", &self.root, source)
            })?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION)
            {
                continue;
            }

            let id = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if let Some(session) = cached.get(id) {
                overviews.push(session.overview());
                continue;
            }

            match self.load_record(path) {
                Ok(Some(record)) => overviews.push(record.overview()),
                Ok(None) => {}
                Err(err) => warn!(path = %path.display(), %err, "skipping unreadable session record"),
            }
        }

        overviews.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(overviews)
    }

    fn load_record(&self, path: &Path) -> Result<Option<SessionRecord>, StoreError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::io("reading session record", path, source)),
        };

        let record: SessionRecord =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if record.format_version != RECORD_FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                path: path.to_path_buf(),
                found: record.format_version,
            });
        }
        Ok(Some(record))
    }
}

fn encode(record: &SessionRecord) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec_pretty(record).map_err(StoreError::Encode)
}
