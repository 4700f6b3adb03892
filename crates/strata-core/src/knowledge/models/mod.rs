//! Data models for the knowledge graph.

mod chunk;
mod node;
mod report;

pub use chunk::{ChunkVector, CodeChunk, EmbeddingStatus, IndexStats, SearchResult};
pub use node::{
    ApiEndpointNode, ClassKind, ClassNode, DataModelNode, FileNode, FunctionNode, ModelField,
    RepositoryNode, RepositoryStatus, RepositorySummary, ServiceNode,
};
pub use report::{RepairReport, VerificationReport};
