use crate::error::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("failed to set {language} grammar for parser")]
    LanguageSet { language: String },

    #[error("failed to parse {}", path.display())]
    ParseFailed { path: PathBuf },

    #[error("failed to reparse edited {language} tree")]
    ReparseFailed { language: String },

    #[error("analysis cancelled")]
    Cancelled,
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Analysis,
        }
    }
}
