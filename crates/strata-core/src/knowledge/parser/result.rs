//! Normalized structural model produced by every parser.

use serde::{Deserialize, Serialize};

use super::language::Language;
use crate::knowledge::models::{ClassKind, ModelField};

/// Owner name used for chunks that no function or class contains.
pub const FILE_OWNER: &str = "<file>";

/// Structure extracted from one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStructure {
    /// Repository-relative path.
    pub path: String,
    pub language: Language,
    /// Declared package or namespace.
    pub package: Option<String>,
    /// Free functions (not declared inside a class body).
    pub functions: Vec<ParsedFunction>,
    pub classes: Vec<ParsedClass>,
    pub imports: Vec<ParsedImport>,
    pub endpoints: Vec<ParsedEndpoint>,
    pub data_models: Vec<ParsedDataModel>,
    /// Markdown headings.
    pub sections: Vec<Section>,
    /// Non-fatal problems found while parsing.
    pub parse_errors: Vec<ParseIssue>,
    pub is_documentation: bool,
    pub is_schema: bool,
    pub is_config: bool,
}

impl FileStructure {
    /// Create an empty structure for the given file.
    pub fn new(path: impl Into<String>, language: Language) -> Self {
        Self {
            path: path.into(),
            language,
            package: None,
            functions: Vec::new(),
            classes: Vec::new(),
            imports: Vec::new(),
            endpoints: Vec::new(),
            data_models: Vec::new(),
            sections: Vec::new(),
            parse_errors: Vec::new(),
            is_documentation: language == Language::Markdown,
            is_schema: language == Language::Protobuf,
            is_config: language == Language::Yaml,
        }
    }

    /// A structure with no children, used when a parser gave up entirely.
    pub fn degraded(path: impl Into<String>, language: Language, message: impl Into<String>) -> Self {
        let mut structure = Self::new(path, language);
        structure.add_error(None, message);
        structure
    }

    pub fn add_error(&mut self, line: Option<u32>, message: impl Into<String>) {
        self.parse_errors.push(ParseIssue {
            line,
            message: message.into(),
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.parse_errors.is_empty()
    }

    /// Line spans of every entity that can own chunks, keyed by owner name.
    pub fn owner_spans(&self) -> Vec<OwnerSpan> {
        let functions = self.functions.iter().map(|f| OwnerSpan {
            owner: f.owner_name(),
            start_line: f.start_line,
            end_line: f.end_line,
        });
        let classes = self.classes.iter().map(|c| OwnerSpan {
            owner: c.owner_name(),
            start_line: c.start_line,
            end_line: c.end_line,
        });
        functions.chain(classes).collect()
    }

    /// Smallest class whose body contains the line.
    pub fn enclosing_class(&self, line: u32) -> Option<&ParsedClass> {
        self.classes
            .iter()
            .filter(|c| c.start_line <= line && line <= c.end_line)
            .min_by_key(|c| c.end_line - c.start_line)
    }
}

/// A function or Go method declared outside any class body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedFunction {
    pub name: String,
    /// First line of the declaration.
    pub signature: String,
    pub start_line: u32,
    pub end_line: u32,
    /// Go receiver type.
    pub receiver: Option<String>,
    pub doc_comment: Option<String>,
}

impl ParsedFunction {
    pub fn owner_name(&self) -> String {
        function_owner_name(&self.name, self.start_line)
    }
}

/// Chunk owner name of a function.
pub fn function_owner_name(name: &str, start_line: u32) -> String {
    format!("fn:{}:{}", name, start_line)
}

/// Chunk owner name of a class.
pub fn class_owner_name(name: &str) -> String {
    format!("class:{}", name)
}

/// A method declared inside a class body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedMethod {
    pub name: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// A class-like declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedClass {
    pub name: String,
    pub kind: ClassKind,
    /// Base classes and implemented interfaces, as written (generics stripped).
    pub superclasses: Vec<String>,
    pub methods: Vec<ParsedMethod>,
    /// Annotations, attributes and decorators on the declaration.
    pub annotations: Vec<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub is_data_model: bool,
    pub is_api: bool,
    pub doc_comment: Option<String>,
}

impl ParsedClass {
    pub fn new(name: impl Into<String>, kind: ClassKind, start_line: u32, end_line: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            superclasses: Vec::new(),
            methods: Vec::new(),
            annotations: Vec::new(),
            start_line,
            end_line,
            is_data_model: kind == ClassKind::Message,
            is_api: kind == ClassKind::Service,
            doc_comment: None,
        }
    }

    pub fn owner_name(&self) -> String {
        class_owner_name(&self.name)
    }
}

/// An import statement. `module` keeps the literal text that was imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedImport {
    /// Imported module, package or path as written.
    pub module: String,
    /// Imported symbol (`from m import symbol`), when there is one.
    pub symbol: Option<String>,
    pub line: u32,
}

impl ParsedImport {
    pub fn new(module: impl Into<String>, line: u32) -> Self {
        Self {
            module: module.into(),
            symbol: None,
            line,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    /// Name recorded on the IMPORTS edge.
    pub fn display_name(&self) -> String {
        match &self.symbol {
            Some(symbol) => format!("{}.{}", self.module.trim_end_matches('.'), symbol)
                .trim_start_matches('.')
                .to_string(),
            None => self.module.clone(),
        }
    }
}

/// An HTTP route or RPC method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedEndpoint {
    pub route: String,
    /// HTTP verb in upper case, or `RPC`.
    pub method: String,
    pub handler: Option<String>,
    pub framework: String,
    pub line: u32,
    /// Declaring class, when known from the source (proto services).
    pub owner_class: Option<String>,
    pub request_type: Option<String>,
    pub response_type: Option<String>,
}

impl ParsedEndpoint {
    pub fn http(route: impl Into<String>, method: &str, framework: &str, line: u32) -> Self {
        Self {
            route: route.into(),
            method: method.to_uppercase(),
            handler: None,
            framework: framework.to_string(),
            line,
            owner_class: None,
            request_type: None,
            response_type: None,
        }
    }
}

/// A data model declared by a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedDataModel {
    pub name: String,
    /// Name of the declaring class.
    pub class_name: String,
    /// `protobuf`, `sqlalchemy`, `django`, `pydantic`, `jpa`, ...
    pub source: String,
    pub fields: Vec<ModelField>,
}

/// A Markdown heading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub level: u32,
    pub line: u32,
}

/// A recoverable parse problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseIssue {
    pub line: Option<u32>,
    pub message: String,
}

impl std::fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}", line, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Line span of an entity that can own chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerSpan {
    pub owner: String,
    pub start_line: u32,
    pub end_line: u32,
}

impl OwnerSpan {
    pub fn contains(&self, start: u32, end: u32) -> bool {
        self.start_line <= start && end <= self.end_line
    }

    pub fn len(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line)
    }
}
