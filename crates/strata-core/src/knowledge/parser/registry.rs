//! Parser registry dispatching files to language parsers.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use super::csharp::CSharpParser;
use super::datamodel::detect_data_models;
use super::endpoints::detect_endpoints;
use super::generic::{self, GenericParser};
use super::go::GoParser;
use super::java::JavaParser;
use super::language::Language;
use super::markdown::MarkdownParser;
use super::protobuf::ProtobufParser;
use super::python::PythonParser;
use super::result::FileStructure;
use super::traits::{Parser, ParserCapability};
use super::typescript::TypeScriptParser;
use super::yaml::YamlParser;

/// Registry of language parsers.
///
/// Every [`Language`] maps to exactly one parser; anything unrecognized goes
/// to the generic line-pattern parser, so [`ParserRegistry::parse`] always
/// returns a structure.
pub struct ParserRegistry {
    parsers: HashMap<Language, Arc<dyn Parser>>,
    fallback: Arc<dyn Parser>,
}

impl ParserRegistry {
    /// Create a registry with all built-in parsers.
    pub fn new() -> Self {
        let mut registry = Self {
            parsers: HashMap::new(),
            fallback: Arc::new(GenericParser::new()),
        };

        registry.register(Arc::new(PythonParser::new()));
        registry.register(Arc::new(GoParser::new()));
        registry.register(Arc::new(CSharpParser::new()));
        registry.register(Arc::new(JavaParser::new()));
        registry.register(Arc::new(TypeScriptParser::javascript()));
        registry.register(Arc::new(TypeScriptParser::typescript()));
        registry.register(Arc::new(MarkdownParser::new()));
        registry.register(Arc::new(YamlParser::new()));
        registry.register(Arc::new(ProtobufParser::new()));

        registry
    }

    /// Register a parser for its language, replacing any previous one.
    pub fn register(&mut self, parser: Arc<dyn Parser>) {
        self.parsers.insert(parser.language(), parser);
    }

    /// Parser for a path; the generic parser when none is registered.
    pub fn parser_for_path(&self, path: &str) -> Arc<dyn Parser> {
        self.parsers
            .get(&Language::from_path(path))
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// Capability used for a path.
    pub fn capability_for(&self, path: &str) -> ParserCapability {
        self.parser_for_path(path).capability()
    }

    /// Parse a file. Never fails: grammar errors are recorded on the result,
    /// and a parser that gives up or panics yields a childless structure.
    pub fn parse(&self, path: &str, content: &str) -> FileStructure {
        let parser = self.parser_for_path(path);
        let language = parser.language();

        let outcome = catch_unwind(AssertUnwindSafe(|| parser.parse_file(path, content)));
        let mut structure = match outcome {
            Ok(Ok(structure)) => structure,
            Ok(Err(message)) => {
                warn!(path, %language, error = %message, "Parser failed, keeping file without structure");
                return FileStructure::degraded(path, language, message);
            }
            Err(_) => {
                warn!(path, %language, "Parser panicked, keeping file without structure");
                return FileStructure::degraded(path, language, "parser panicked");
            }
        };

        if language.has_grammar() && structure.has_errors() {
            salvage(&mut structure, content);
        }

        if !matches!(language, Language::Markdown | Language::Yaml | Language::Protobuf) {
            detect_endpoints(&mut structure, content);
            detect_data_models(&mut structure, content);
        }

        if structure.has_errors() {
            debug!(
                path,
                errors = structure.parse_errors.len(),
                functions = structure.functions.len(),
                classes = structure.classes.len(),
                "Parsed with errors"
            );
        }

        structure
    }
}

/// Add declarations the line-pattern extractor finds before the first syntax
/// error that the grammar did not recover.
fn salvage(structure: &mut FileStructure, content: &str) {
    let Some(first_error) = structure.parse_errors.iter().filter_map(|e| e.line).min() else {
        return;
    };

    let mut recovered = generic::extract(&structure.path, content, structure.language);
    generic::truncate_before(&mut recovered, first_error);

    let inside_known_class = |line: u32, s: &FileStructure| {
        s.classes.iter().any(|c| c.start_line <= line && line <= c.end_line)
    };

    for class in recovered.classes {
        if !structure.classes.iter().any(|c| c.name == class.name) {
            structure.classes.push(class);
        }
    }
    for func in recovered.functions {
        let known = structure.functions.iter().any(|f| f.name == func.name);
        if !known && !inside_known_class(func.start_line, structure) {
            structure.functions.push(func);
        }
    }
    if structure.imports.is_empty() {
        structure.imports = recovered.imports;
    }
    structure.functions.sort_by_key(|f| f.start_line);
    structure.classes.sort_by_key(|c| c.start_line);
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}
