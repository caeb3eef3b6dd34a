//! Thread-local parser pooling.
//!
//! Keeps one reusable parser per grammar per thread. A parser is created on
//! first use of its grammar and reused for every later parse and reparse.

use crate::analysis::errors::AnalysisError;
use crate::analysis::parser::SourceParser;
use ast_grep_language::SupportLang;
use std::cell::RefCell;
use std::collections::HashMap;

thread_local! {
    // Keyed by the grammar's debug name; SupportLang is not guaranteed to be Hash.
    static PARSERS: RefCell<HashMap<String, SourceParser>> = RefCell::new(HashMap::new());
}

/// Execute `f` with the pooled parser for `language`.
pub fn with_parser<F, R>(language: SupportLang, f: F) -> Result<R, AnalysisError>
where
    F: FnOnce(&mut SourceParser) -> R,
{
    PARSERS.with(|cell| {
        let mut parsers = cell.borrow_mut();
        let key = format!("{language:?}");
        let parser = match parsers.entry(key) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(SourceParser::new(language)?)
            }
        };
        Ok(f(parser))
    })
}

/// Number of grammars with a pooled parser on this thread.
pub fn pooled_count() -> usize {
    PARSERS.with(|cell| cell.borrow().len())
}
