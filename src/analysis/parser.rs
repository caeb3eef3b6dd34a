use crate::analysis::errors::AnalysisError;
use ast_grep_language::{LanguageExt, SupportLang};
use std::path::Path;
use tree_sitter::{InputEdit, Parser, Point, Tree};

/// Tree-sitter parser bound to one grammar.
pub struct SourceParser {
    parser: Parser,
    language: SupportLang,
}

impl SourceParser {
    pub fn new(language: SupportLang) -> Result<Self, AnalysisError> {
        let mut parser = Parser::new();
        // Get the tree-sitter Language from ast-grep-language
        let ts_lang = language.get_ts_language();
        parser
            .set_language(&ts_lang)
            .map_err(|_| AnalysisError::LanguageSet {
                language: format!("{language:?}"),
            })?;

        Ok(Self { parser, language })
    }

    pub fn language(&self) -> SupportLang {
        self.language
    }

    /// Parse `source`, reusing `previous` for incremental parsing when given.
    ///
    /// `previous` must already have been adjusted with [`Tree::edit`].
    pub fn parse(&mut self, source: &str, previous: Option<&Tree>) -> Option<Tree> {
        self.parser.parse(source, previous)
    }
}

/// A parse tree together with the grammar that produced it.
///
/// This is the per-document analysis context: it lives only in memory and
/// is rebuilt from text whenever a session is reloaded.
#[derive(Clone)]
pub struct SyntaxTree {
    language: SupportLang,
    tree: Tree,
}

impl SyntaxTree {
    pub(crate) fn new(language: SupportLang, tree: Tree) -> Self {
        Self { language, tree }
    }

    pub fn language(&self) -> SupportLang {
        self.language
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn has_errors(&self) -> bool {
        self.tree.root_node().has_error()
    }
}

impl std::fmt::Debug for SyntaxTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntaxTree")
            .field("language", &self.language)
            .field("root", &self.tree.root_node().kind())
            .finish()
    }
}

/// The single contiguous region that differs between two snapshots,
/// expressed the way tree-sitter wants it for incremental reparsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChange {
    pub start_byte: usize,
    pub old_end_byte: usize,
    pub new_end_byte: usize,
    pub start_point: Point,
    pub old_end_point: Point,
    pub new_end_point: Point,
}

impl TextChange {
    /// Describe the edit turning `old` into `new`, or `None` if equal.
    ///
    /// The region is bounded by the longest common prefix and suffix, both
    /// cut at character boundaries.
    pub fn between(old: &str, new: &str) -> Option<Self> {
        if old == new {
            return None;
        }

        let prefix: usize = old
            .chars()
            .zip(new.chars())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a.len_utf8())
            .sum();

        let mut suffix = old.as_bytes()[prefix..]
            .iter()
            .rev()
            .zip(new.as_bytes()[prefix..].iter().rev())
            .take_while(|(a, b)| a == b)
            .count();
        while suffix > 0
            && !(old.is_char_boundary(old.len() - suffix) && new.is_char_boundary(new.len() - suffix))
        {
            suffix -= 1;
        }

        let old_end = old.len() - suffix;
        let new_end = new.len() - suffix;
        Some(Self {
            start_byte: prefix,
            old_end_byte: old_end,
            new_end_byte: new_end,
            start_point: point_at(old, prefix),
            old_end_point: point_at(old, old_end),
            new_end_point: point_at(new, new_end),
        })
    }

    pub(crate) fn input_edit(&self) -> InputEdit {
        InputEdit {
            start_byte: self.start_byte,
            old_end_byte: self.old_end_byte,
            new_end_byte: self.new_end_byte,
            start_position: self.start_point,
            old_end_position: self.old_end_point,
            new_end_position: self.new_end_point,
        }
    }
}

/// Row and byte column of `offset` in `text`.
fn point_at(text: &str, offset: usize) -> Point {
    let before = &text.as_bytes()[..offset];
    let row = before.iter().filter(|b| **b == b'\n').count();
    let line_start = before
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |i| i + 1);
    Point::new(row, offset - line_start)
}

/// Parse a file's text if its extension maps to a known grammar.
pub(crate) fn parse_for_path(
    path: &Path,
    language: SupportLang,
    text: &str,
) -> Result<SyntaxTree, AnalysisError> {
    crate::analysis::pool::with_parser(language, |parser| parser.parse(text, None))?
        .map(|tree| SyntaxTree::new(language, tree))
        .ok_or_else(|| AnalysisError::ParseFailed {
            path: path.to_path_buf(),
        })
}
