//! Structural parsing of repository files.
//!
//! Provides a `Parser` trait for extracting declarations from source files,
//! with tree-sitter implementations for Python, Go, Java, C#, and
//! TypeScript/JavaScript, lightweight parsers for Markdown, YAML, and
//! Protobuf, and a line-pattern fallback for everything else.
//!
//! ## Components
//!
//! - `Parser` trait - Common interface for all language parsers
//! - `ParserRegistry` - Maps detected languages to parsers, never fails
//! - `FileStructure` - Declarations, imports, endpoints, and problems of one file
//!
//! Endpoint and data-model detection run as post-passes over every source
//! file, whichever parser produced its structure.

mod csharp;
mod datamodel;
mod endpoints;
mod generic;
mod go;
mod java;
mod language;
mod markdown;
mod patterns;
mod protobuf;
mod python;
mod registry;
mod result;
mod traits;
mod treesitter;
mod typescript;
mod yaml;

pub use csharp::CSharpParser;
pub use generic::GenericParser;
pub use go::GoParser;
pub use java::JavaParser;
pub use language::{extension_of, language_label, Language};
pub use markdown::MarkdownParser;
pub use protobuf::ProtobufParser;
pub use python::PythonParser;
pub use registry::ParserRegistry;
pub use result::{
    class_owner_name, function_owner_name, FileStructure, OwnerSpan, ParseIssue, ParsedClass, ParsedDataModel, ParsedEndpoint,
    ParsedFunction, ParsedImport, ParsedMethod, Section, FILE_OWNER,
};
pub use traits::{Parser, ParserCapability};
pub use typescript::TypeScriptParser;
pub use yaml::YamlParser;
