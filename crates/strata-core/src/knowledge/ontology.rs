//! Node and relationship types of the code knowledge graph.
//!
//! The containment hierarchy is Repository -> File -> {Function, Class} -> CodeChunk.
//! Files point at their repository with `BELONGS_TO`; every other parent points
//! at its children with `CONTAINS`. Detected services sit beside that
//! hierarchy: a Service belongs to its Repository, contains the files under
//! its directory and `DEPENDS_ON` other services.

use serde::{Deserialize, Serialize};

use super::identity::edge_key;

/// Node types, serialized as their table names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    #[serde(rename = "repository")]
    Repository,
    #[serde(rename = "file")]
    File,
    #[serde(rename = "function")]
    Function,
    #[serde(rename = "class")]
    Class,
    #[serde(rename = "api_endpoint")]
    ApiEndpoint,
    #[serde(rename = "data_model")]
    DataModel,
    #[serde(rename = "chunk")]
    CodeChunk,
    #[serde(rename = "service")]
    Service,
}

impl NodeKind {
    /// Table holding nodes of this kind.
    pub fn table(&self) -> &'static str {
        match self {
            Self::Repository => "repository",
            Self::File => "file",
            Self::Function => "function",
            Self::Class => "class",
            Self::ApiEndpoint => "api_endpoint",
            Self::DataModel => "data_model",
            Self::CodeChunk => "chunk",
            Self::Service => "service",
        }
    }

    /// Label used in reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Repository => "Repository",
            Self::File => "File",
            Self::Function => "Function",
            Self::Class => "Class",
            Self::ApiEndpoint => "ApiEndpoint",
            Self::DataModel => "DataModel",
            Self::CodeChunk => "CodeChunk",
            Self::Service => "Service",
        }
    }

    pub const ALL: [NodeKind; 8] = [
        Self::Repository,
        Self::File,
        Self::Function,
        Self::Class,
        Self::ApiEndpoint,
        Self::DataModel,
        Self::CodeChunk,
        Self::Service,
    ];
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Relationship types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    /// Parent -> child containment.
    Contains,
    /// Child -> parent containment (File or Service -> Repository).
    BelongsTo,
    /// Class -> Class.
    InheritsFrom,
    /// File -> File, carrying the imported name.
    Imports,
    /// Service -> Service, from deployment manifests.
    DependsOn,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "CONTAINS",
            Self::BelongsTo => "BELONGS_TO",
            Self::InheritsFrom => "INHERITS_FROM",
            Self::Imports => "IMPORTS",
            Self::DependsOn => "DEPENDS_ON",
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored relationship. Its record id is derived from (src, kind, dst), so
/// writing the same relationship twice leaves one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub key: String,
    /// Repository key the edge belongs to.
    pub repo: String,
    pub kind: EdgeKind,
    pub src: String,
    pub src_kind: NodeKind,
    /// Target node key; `None` for an import that could not be resolved.
    pub dst: Option<String>,
    pub dst_kind: Option<NodeKind>,
    /// File that produced the edge, used to replace a file's outgoing edges.
    pub origin: Option<String>,
    /// Imported symbol or module name (IMPORTS only).
    pub name: Option<String>,
    /// Source line of the statement that produced the edge.
    pub line: Option<u32>,
}

impl EdgeRecord {
    /// A resolved relationship between two nodes.
    pub fn new(
        repo: &str,
        kind: EdgeKind,
        src: (&str, NodeKind),
        dst: (&str, NodeKind),
    ) -> Self {
        Self {
            key: edge_key(src.0, kind.as_str(), dst.0),
            repo: repo.to_string(),
            kind,
            src: src.0.to_string(),
            src_kind: src.1,
            dst: Some(dst.0.to_string()),
            dst_kind: Some(dst.1),
            origin: None,
            name: None,
            line: None,
        }
    }

    /// An import edge; `target` is `None` when resolution failed.
    pub fn import(repo: &str, file_key: &str, name: &str, line: u32, target: Option<&str>) -> Self {
        let dst_part = match target {
            Some(t) => t.to_string(),
            None => format!("?{}", name),
        };
        Self {
            key: edge_key(file_key, EdgeKind::Imports.as_str(), &dst_part),
            repo: repo.to_string(),
            kind: EdgeKind::Imports,
            src: file_key.to_string(),
            src_kind: NodeKind::File,
            dst: target.map(str::to_string),
            dst_kind: target.map(|_| NodeKind::File),
            origin: None,
            name: Some(name.to_string()),
            line: Some(line),
        }
    }

    pub fn with_origin(mut self, path: &str) -> Self {
        self.origin = Some(path.to_string());
        self
    }

    /// Whether this is a Repository -> CodeChunk shortcut edge.
    pub fn is_fallback(&self) -> bool {
        self.kind == EdgeKind::Contains
            && self.src_kind == NodeKind::Repository
            && self.dst_kind == Some(NodeKind::CodeChunk)
    }

    pub fn is_resolved(&self) -> bool {
        self.dst.is_some()
    }
}
