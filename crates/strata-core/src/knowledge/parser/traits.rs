//! Core parser trait shared by every language variant.

use super::language::Language;
use super::result::FileStructure;

/// Language parser.
///
/// Every variant produces the same [`FileStructure`]. A parser returns `Err`
/// only when it could not produce any structure at all (for example when the
/// grammar failed to load); recoverable syntax problems are recorded in
/// `FileStructure::parse_errors` instead.
pub trait Parser: Send + Sync {
    /// Parse a source file.
    ///
    /// # Arguments
    /// * `path` - Repository-relative path of the file
    /// * `content` - Source code content
    fn parse_file(&self, path: &str, content: &str) -> Result<FileStructure, String>;

    /// Language handled by this parser.
    fn language(&self) -> Language;

    /// Parse capability level.
    ///
    /// - `Basic`: line/regex based extraction (names, positions)
    /// - `Lightweight`: format-aware extraction without a full grammar
    /// - `Structural`: grammar-based extraction
    fn capability(&self) -> ParserCapability {
        ParserCapability::Structural
    }
}

/// Level of parsing capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParserCapability {
    /// Regex extraction - names and line numbers only.
    Basic,
    /// Format-specific extraction (Markdown, YAML, Protobuf).
    Lightweight,
    /// AST-based extraction.
    Structural,
}

impl std::fmt::Display for ParserCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic => write!(f, "Basic"),
            Self::Lightweight => write!(f, "Lightweight"),
            Self::Structural => write!(f, "Structural"),
        }
    }
}
