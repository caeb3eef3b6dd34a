//! Grammar selection by file extension.
//!
//! Grammars come from ast-grep-language's built-in `SupportLang` set rather
//! than from individual tree-sitter grammar crates.

pub use ast_grep_language::SupportLang;
use std::path::Path;

/// Pick the grammar for a document, or `None` for plain text.
pub fn language_for_path(path: &Path) -> Option<SupportLang> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let language = match extension.as_str() {
        "rs" => SupportLang::Rust,
        "py" | "pyi" => SupportLang::Python,
        "js" | "mjs" | "cjs" | "jsx" => SupportLang::JavaScript,
        "ts" | "mts" | "cts" => SupportLang::TypeScript,
        "tsx" => SupportLang::Tsx,
        "go" => SupportLang::Go,
        "java" => SupportLang::Java,
        "c" | "h" => SupportLang::C,
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => SupportLang::Cpp,
        "json" => SupportLang::Json,
        _ => return None,
    };
    Some(language)
}
