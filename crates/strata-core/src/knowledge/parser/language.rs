//! The closed set of languages the parser dispatches on.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Detected language of a file. `Generic` covers every other extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Go,
    CSharp,
    Java,
    JavaScript,
    TypeScript,
    Markdown,
    Yaml,
    Protobuf,
    Generic,
}

impl Language {
    /// Detect the language from a file extension (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "py" | "pyi" => Self::Python,
            "go" => Self::Go,
            "cs" => Self::CSharp,
            "java" => Self::Java,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "ts" | "tsx" | "mts" | "cts" => Self::TypeScript,
            "md" | "markdown" => Self::Markdown,
            "yaml" | "yml" => Self::Yaml,
            "proto" => Self::Protobuf,
            _ => Self::Generic,
        }
    }

    /// Detect the language from a path.
    pub fn from_path(path: &str) -> Self {
        extension_of(path)
            .map(Self::from_extension)
            .unwrap_or(Self::Generic)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Go => "go",
            Self::CSharp => "csharp",
            Self::Java => "java",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Markdown => "markdown",
            Self::Yaml => "yaml",
            Self::Protobuf => "protobuf",
            Self::Generic => "generic",
        }
    }

    /// Whether a tree-sitter grammar backs this language.
    pub fn has_grammar(&self) -> bool {
        matches!(
            self,
            Self::Python | Self::Go | Self::CSharp | Self::Java | Self::JavaScript | Self::TypeScript
        )
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Lowercase extension of a path, if any.
pub fn extension_of(path: &str) -> Option<&str> {
    Path::new(path).extension().and_then(|e| e.to_str())
}

/// Language label stored on File nodes. Files handled by the generic parser
/// still get a descriptive label from their extension.
pub fn language_label(path: &str) -> String {
    let language = Language::from_path(path);
    if language != Language::Generic {
        return language.name().to_string();
    }
    let label = match extension_of(path).map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("rs") => "rust",
        Some("rb") => "ruby",
        Some("php") => "php",
        Some("kt") | Some("kts") => "kotlin",
        Some("scala") => "scala",
        Some("swift") => "swift",
        Some("c") | Some("h") => "c",
        Some("cpp") | Some("cc") | Some("hpp") | Some("hh") => "cpp",
        Some("json") => "json",
        Some("toml") => "toml",
        Some("xml") => "xml",
        Some("sql") => "sql",
        Some("sh") | Some("bash") | Some("zsh") => "shell",
        Some("html") | Some("htm") => "html",
        Some("css") | Some("scss") => "css",
        _ => "text",
    };
    label.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection() {
        assert_eq!(Language::from_path("a/b.py"), Language::Python);
        assert_eq!(Language::from_path("x.JSX"), Language::JavaScript);
        assert_eq!(Language::from_path("svc.proto"), Language::Protobuf);
        assert_eq!(Language::from_path("ci.yml"), Language::Yaml);
        assert_eq!(Language::from_path("Makefile"), Language::Generic);
        assert_eq!(Language::from_path("lib.rs"), Language::Generic);
    }

    #[test]
    fn test_labels() {
        assert_eq!(language_label("lib.rs"), "rust");
        assert_eq!(language_label("Main.java"), "java");
        assert_eq!(language_label("notes"), "text");
    }
}
