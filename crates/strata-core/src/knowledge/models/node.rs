//! Node types for the knowledge graph.
//!
//! Records are stored under ids derived from their `key` field, so none of
//! them carries a database id.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for RepositoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A repository at one branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryNode {
    /// Natural key: `<normalized-url>@<branch>`.
    pub key: String,
    /// Normalized clone URL.
    pub url: String,
    pub branch: String,
    /// Display name.
    pub name: String,
    pub description: Option<String>,
    /// Commit of the last fully successful ingestion.
    pub last_indexed_commit: Option<String>,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub status: RepositoryStatus,
    /// Last error message when `status` is `failed`.
    pub error: Option<String>,
    /// Job currently or most recently working on this repository.
    pub job_id: Option<String>,
    /// Service detection was requested once and runs on every later ingestion.
    #[serde(default)]
    pub detect_services: bool,
    pub updated_at: DateTime<Utc>,
}

/// A file node in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub key: String,
    /// Repository key.
    pub repo: String,
    /// Repository-relative path with forward slashes.
    pub path: String,
    /// File name.
    pub name: String,
    /// File extension.
    pub extension: String,
    /// Detected language.
    pub language: String,
    /// File size in bytes.
    pub size: u64,
    /// SHA256 hash of file contents (for change detection).
    pub content_hash: String,
    pub is_documentation: bool,
    /// Schema or IDL file (protobuf).
    pub is_schema: bool,
    /// Configuration file (YAML).
    pub is_config: bool,
    /// Problems recorded while parsing.
    pub parse_errors: Vec<String>,
    /// Declared package or namespace, when the language has one.
    pub package: Option<String>,
}

/// A top-level function node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionNode {
    pub key: String,
    pub repo: String,
    /// File containing this function.
    pub file_path: String,
    /// Function name.
    pub name: String,
    /// Function signature.
    pub signature: String,
    /// Start line number.
    pub start_line: u32,
    /// End line number.
    pub end_line: u32,
    /// Receiver type for Go methods.
    pub receiver: Option<String>,
    /// Documentation comment.
    pub doc_comment: Option<String>,
}

/// Class-like declaration kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassKind {
    #[default]
    Class,
    Struct,
    Interface,
    Enum,
    Message,
    Service,
}

impl std::fmt::Display for ClassKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Interface => "interface",
            Self::Enum => "enum",
            Self::Message => "message",
            Self::Service => "service",
        };
        write!(f, "{}", s)
    }
}

/// A class, struct, interface, or protobuf message/service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassNode {
    pub key: String,
    pub repo: String,
    /// Declaring file. Shared protobuf definitions keep the copy loaded last.
    pub file_path: String,
    pub name: String,
    pub kind: ClassKind,
    pub is_data_model: bool,
    pub is_api: bool,
    /// Shared across files (protobuf definitions keyed by package).
    pub logical: bool,
    pub package: Option<String>,
    /// Declared base classes and interfaces, as written.
    pub superclasses: Vec<String>,
    /// Method names declared in the body.
    pub methods: Vec<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub doc_comment: Option<String>,
}

/// An HTTP route or RPC method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEndpointNode {
    pub key: String,
    pub repo: String,
    pub file_path: String,
    /// Route path, or `/<package>.<Service>/<Method>` for RPCs.
    pub route: String,
    /// HTTP verb, or `RPC`.
    pub method: String,
    pub handler: Option<String>,
    pub framework: String,
    pub line: u32,
    /// Key of the Class or File declaring the endpoint.
    pub owner: String,
    /// Request and response message types for RPCs.
    pub request_type: Option<String>,
    pub response_type: Option<String>,
    /// Declared by a shared protobuf service.
    pub logical: bool,
}

/// A field of a data model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelField {
    pub name: String,
    pub type_name: String,
    /// Protobuf label (`repeated`, `optional`, `required`) or ORM column kind.
    pub modifier: Option<String>,
    /// Protobuf field number.
    pub number: Option<u32>,
}

/// A persisted or wire data model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataModelNode {
    pub key: String,
    pub repo: String,
    pub file_path: String,
    pub name: String,
    /// Key of the Class the model is declared by.
    pub class_key: String,
    /// `protobuf` or the ORM that was detected.
    pub source: String,
    pub fields: Vec<ModelField>,
    /// Declared by a shared protobuf message.
    pub logical: bool,
}

/// A deployable service detected in a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceNode {
    pub key: String,
    pub repo: String,
    pub name: String,
    /// Majority language of the service's code; `None` for services only
    /// declared in a manifest.
    pub language: Option<String>,
    /// Repository-relative directory holding the service's code.
    pub directory: Option<String>,
    /// Manifest declaring the service.
    pub manifest: Option<String>,
    /// Container images, in declaration order.
    pub images: Vec<String>,
    pub ports: Vec<String>,
    pub labels: BTreeMap<String, String>,
    /// Names of services this one depends on, as declared.
    pub depends_on: Vec<String>,
    /// Ingested files under `directory`.
    pub file_count: usize,
}

/// Summary row for listing repositories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySummary {
    pub key: String,
    pub url: String,
    pub branch: String,
    pub name: String,
    pub status: RepositoryStatus,
    pub last_indexed_commit: Option<String>,
    pub last_indexed_at: Option<DateTime<Utc>>,
}

impl From<&RepositoryNode> for RepositorySummary {
    fn from(node: &RepositoryNode) -> Self {
        Self {
            key: node.key.clone(),
            url: node.url.clone(),
            branch: node.branch.clone(),
            name: node.name.clone(),
            status: node.status,
            last_indexed_commit: node.last_indexed_commit.clone(),
            last_indexed_at: node.last_indexed_at,
        }
    }
}
