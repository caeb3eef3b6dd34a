//! Workspace confinement for the files sessions and transactions touch.

use crate::error::{self, ErrorKind};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directories under the workspace that are never edited.
const FORBIDDEN_SUBDIRS: &[&str] = &[".git", "target", "node_modules"];

/// Restricts edits to files below one root directory.
#[derive(Debug, Clone)]
pub struct WorkspaceGuard {
    root: PathBuf,
    /// Canonical, so comparisons survive symlinks
    forbidden: Vec<PathBuf>,
}

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("{} is outside the workspace {}", path.display(), root.display())]
    OutsideWorkspace { path: PathBuf, root: PathBuf },

    #[error("{} is inside the protected directory {}", path.display(), forbidden.display())]
    Forbidden { path: PathBuf, forbidden: PathBuf },

    #[error("cannot resolve {}: {source}", path.display())]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkspaceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkspaceError::Resolve { source, .. } => error::io_kind(source),
            _ => ErrorKind::InvalidInput,
        }
    }
}

fn canonicalize(path: &Path) -> Result<PathBuf, WorkspaceError> {
    path.canonicalize().map_err(|source| WorkspaceError::Resolve {
        path: path.to_path_buf(),
        source,
    })
}

impl WorkspaceGuard {
    /// Guard rooted at `root`. Toolchain caches under the home directory and
    /// the given `extra_forbidden` directories are protected as well.
    pub fn new(
        root: impl AsRef<Path>,
        extra_forbidden: &[PathBuf],
    ) -> Result<Self, WorkspaceError> {
        let root = canonicalize(root.as_ref())?;

        let mut candidates: Vec<PathBuf> = FORBIDDEN_SUBDIRS.iter().map(|d| root.join(d)).collect();
        if let Some(home) = home::home_dir() {
            candidates.extend([
                home.join(".cargo/registry"),
                home.join(".cargo/git"),
                home.join(".rustup"),
            ]);
        }
        candidates.extend(extra_forbidden.iter().cloned());

        // Directories that do not exist yet cannot hold files to edit.
        let forbidden = candidates
            .iter()
            .filter_map(|dir| dir.canonicalize().ok())
            .collect();

        Ok(Self { root, forbidden })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical form of `path` if it may be edited. Relative paths are
    /// taken relative to the workspace root.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf, WorkspaceError> {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        let canonical = canonicalize(&absolute)?;
        self.check(&canonical)?;
        Ok(canonical)
    }

    /// Re-check a path resolved earlier, right before writing it.
    ///
    /// A file deleted since then is checked through its parent directory,
    /// so writing it back stays possible.
    pub fn recheck(&self, path: &Path) -> Result<(), WorkspaceError> {
        let canonical = match path.canonicalize() {
            Ok(canonical) => canonical,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                match (path.parent(), path.file_name()) {
                    (Some(parent), Some(name)) => canonicalize(parent)?.join(name),
                    _ => {
                        return Err(WorkspaceError::Resolve {
                            path: path.to_path_buf(),
                            source: err,
                        })
                    }
                }
            }
            Err(source) => {
                return Err(WorkspaceError::Resolve {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        self.check(&canonical)
    }

    fn check(&self, canonical: &Path) -> Result<(), WorkspaceError> {
        if !canonical.starts_with(&self.root) {
            return Err(WorkspaceError::OutsideWorkspace {
                path: canonical.to_path_buf(),
                root: self.root.clone(),
            });
        }

        match self.forbidden.iter().find(|dir| canonical.starts_with(dir)) {
            Some(dir) => Err(WorkspaceError::Forbidden {
                path: canonical.to_path_buf(),
                forbidden: dir.clone(),
            }),
            None => Ok(()),
        }
    }
}
