//! Runtime settings loaded from TOML.
//!
//! Lookup order: an explicit path, then `EDIT_SESSION_CONFIG`, then
//! `.edit-session.toml` in the working directory, then built-in defaults.
//! `EDIT_SESSION_STATE_DIR` overrides the record directory in every case.

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_ENV: &str = "EDIT_SESSION_CONFIG";
pub const STATE_DIR_ENV: &str = "EDIT_SESSION_STATE_DIR";
pub const LOCAL_CONFIG_FILE: &str = ".edit-session.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory holding one record per session
    pub state_dir: Option<PathBuf>,
    /// When set, sessions and transactions may only touch files below it
    pub workspace_root: Option<PathBuf>,
    pub max_diagnostics: usize,
    pub max_diff_changes: usize,
    pub commit: CommitSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommitSettings {
    pub require_override_on_conflict: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: None,
            workspace_root: None,
            max_diagnostics: 50,
            max_diff_changes: 200,
            commit: CommitSettings::default(),
        }
    }
}

impl Default for CommitSettings {
    fn default() -> Self {
        Self {
            require_override_on_conflict: true,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.max_diagnostics == 0 {
            issues.push(ValidationIssue::ZeroLimit("max_diagnostics"));
        }
        if self.max_diff_changes == 0 {
            issues.push(ValidationIssue::ZeroLimit("max_diff_changes"));
        }
        if self
            .state_dir
            .as_ref()
            .is_some_and(|dir| dir.as_os_str().is_empty())
        {
            issues.push(ValidationIssue::EmptyPath("state_dir"));
        }
        if self
            .workspace_root
            .as_ref()
            .is_some_and(|dir| dir.as_os_str().is_empty())
        {
            issues.push(ValidationIssue::EmptyPath("workspace_root"));
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// Record directory: configured, else `~/.edit-session/sessions`, else
    /// `.edit-session/sessions` under the working directory.
    pub fn state_dir(&self) -> PathBuf {
        match &self.state_dir {
            Some(dir) => dir.clone(),
            None => home::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".edit-session")
                .join("sessions"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    ZeroLimit(&'static str),
    EmptyPath(&'static str),
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::ZeroLimit(field) => write!(f, "'{field}' must be at least 1"),
            ValidationIssue::EmptyPath(field) => write!(f, "'{field}' must not be empty"),
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
                f.write_str("; ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings TOML{}: {source}", path_suffix(path))]
    Toml {
        path: Option<PathBuf>,
        #[source]
        source: toml_edit::de::Error,
    },

    #[error("invalid settings{}: {source}", path_suffix(path))]
    Validation {
        path: Option<PathBuf>,
        #[source]
        source: ValidationError,
    },
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" ({})", path.display()),
        None => String::new(),
    }
}

impl SettingsError {
    fn with_path(self, path: &Path) -> Self {
        let path = Some(path.to_path_buf());
        match self {
            SettingsError::Toml { path: None, source } => SettingsError::Toml { path, source },
            SettingsError::Validation { path: None, source } => {
                SettingsError::Validation { path, source }
            }
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SettingsError::Io { source, .. } => crate::error::io_kind(source),
            SettingsError::Toml { .. } | SettingsError::Validation { .. } => {
                ErrorKind::InvalidInput
            }
        }
    }
}

pub fn load_from_str(input: &str) -> Result<Settings, SettingsError> {
    let settings: Settings = toml_edit::de::from_str(input)
        .map_err(|source| SettingsError::Toml { path: None, source })?;
    settings
        .validate()
        .map_err(|source| SettingsError::Validation { path: None, source })?;
    Ok(settings)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Settings, SettingsError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

/// Resolve settings from the process environment.
pub fn load(explicit: Option<&Path>) -> Result<Settings, SettingsError> {
    resolve(explicit, |name| std::env::var_os(name))
}

/// Resolve settings with `env` standing in for the process environment.
pub fn resolve(
    explicit: Option<&Path>,
    env: impl Fn(&str) -> Option<OsString>,
) -> Result<Settings, SettingsError> {
    let source = explicit
        .map(Path::to_path_buf)
        .or_else(|| env(CONFIG_ENV).map(PathBuf::from))
        .or_else(|| {
            let local = PathBuf::from(LOCAL_CONFIG_FILE);
            local.is_file().then_some(local)
        });

    let mut settings = match source {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading settings");
            load_from_path(&path)?
        }
        None => Settings::default(),
    };

    if let Some(dir) = env(STATE_DIR_ENV).filter(|dir| !dir.is_empty()) {
        settings.state_dir = Some(PathBuf::from(dir));
    }
    Ok(settings)
}
