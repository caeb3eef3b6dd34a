//! Analysis engine boundary.
//!
//! Sessions and transactions only talk to the [`Analyzer`] trait: parse a
//! document, reparse it after an edit, and produce one diagnostic report
//! over a set of documents. [`SyntaxAnalyzer`] is the built-in engine; it
//! uses tree-sitter grammars to report syntax errors and incremental
//! reparsing to keep per-session trees current.

pub mod diagnostic;
pub mod errors;
pub mod language;
pub mod parser;
pub mod pool;

pub use diagnostic::{AnalysisReport, Diagnostic, Severity};
pub use errors::AnalysisError;
pub use language::language_for_path;
pub use parser::{SourceParser, SyntaxTree, TextChange};

use crate::cancel::CancellationToken;
use std::path::Path;

/// One document handed to [`Analyzer::analyze`].
#[derive(Debug, Clone, Copy)]
pub struct SourceDocument<'a> {
    pub path: &'a Path,
    pub text: &'a str,
    /// Tree already matching `text`, if the caller keeps one
    pub tree: Option<&'a SyntaxTree>,
}

impl<'a> SourceDocument<'a> {
    pub fn new(path: &'a Path, text: &'a str) -> Self {
        Self {
            path,
            text,
            tree: None,
        }
    }

    pub fn with_tree(mut self, tree: Option<&'a SyntaxTree>) -> Self {
        self.tree = tree;
        self
    }
}

pub trait Analyzer: Send + Sync {
    /// Parse a document from scratch. `None` when no grammar applies.
    fn parse(&self, path: &Path, text: &str) -> Result<Option<SyntaxTree>, AnalysisError>;

    /// Produce the tree for `text` from `previous` plus the edit between them.
    fn reparse(
        &self,
        previous: &SyntaxTree,
        change: &TextChange,
        text: &str,
    ) -> Result<SyntaxTree, AnalysisError>;

    /// One report across every document, bounded to `max_diagnostics`.
    fn analyze(
        &self,
        documents: &[SourceDocument<'_>],
        max_diagnostics: usize,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport, AnalysisError>;
}

/// Tree-sitter backed syntax checker.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntaxAnalyzer;

impl SyntaxAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl Analyzer for SyntaxAnalyzer {
    fn parse(&self, path: &Path, text: &str) -> Result<Option<SyntaxTree>, AnalysisError> {
        match language_for_path(path) {
            Some(language) => parser::parse_for_path(path, language, text).map(Some),
            None => Ok(None),
        }
    }

    fn reparse(
        &self,
        previous: &SyntaxTree,
        change: &TextChange,
        text: &str,
    ) -> Result<SyntaxTree, AnalysisError> {
        let language = previous.language();
        let mut edited = previous.tree().clone();
        edited.edit(&change.input_edit());

        pool::with_parser(language, |parser| parser.parse(text, Some(&edited)))?
            .map(|tree| SyntaxTree::new(language, tree))
            .ok_or_else(|| AnalysisError::ReparseFailed {
                language: format!("{language:?}"),
            })
    }

    fn analyze(
        &self,
        documents: &[SourceDocument<'_>],
        max_diagnostics: usize,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport, AnalysisError> {
        let mut diagnostics = Vec::new();

        for document in documents {
            if cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }

            let parsed;
            let tree = match document.tree {
                Some(tree) => tree,
                None => match self.parse(document.path, document.text)? {
                    Some(tree) => {
                        parsed = tree;
                        &parsed
                    }
                    None => continue,
                },
            };

            diagnostics.extend(diagnostic::syntax_diagnostics(
                document.path,
                document.text,
                tree.tree(),
            ));
        }

        Ok(AnalysisReport::from_diagnostics(diagnostics, max_diagnostics))
    }
}
