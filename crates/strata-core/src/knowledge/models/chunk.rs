//! Code chunks, their vectors, and search results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Embedding state of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    /// No vector yet.
    #[default]
    Pending,
    /// Vector stored in the index.
    Embedded,
    /// The batch holding this chunk exhausted its retries.
    Failed,
}

/// A code chunk node. Its vector lives in the `chunk_vector` index table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChunk {
    pub key: String,
    pub repo: String,
    /// File path containing this chunk.
    pub file_path: String,
    /// Local name of the owning entity within the file (`<file>` for the file itself).
    pub owner: String,
    /// Position among the owner's chunks.
    pub index: usize,
    /// The actual code content.
    pub content: String,
    /// Start line number (1-based, absolute within the file).
    pub start_line: u32,
    /// End line number (inclusive).
    pub end_line: u32,
    pub embedding_status: EmbeddingStatus,
    /// Model that produced the vector.
    pub model: Option<String>,
    pub dimensions: Option<usize>,
}

/// A vector stored in the index, keyed like its chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkVector {
    pub chunk: String,
    pub repo: String,
    pub file_path: String,
    pub embedding: Vec<f32>,
}

/// A ranked vector search hit with its citation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Chunk key.
    pub chunk: String,
    /// File path.
    pub path: String,
    /// Similarity score (cosine, higher is closer).
    pub score: f32,
    /// Start line number.
    pub start_line: u32,
    /// End line number.
    pub end_line: u32,
    /// Preview of the content.
    pub preview: String,
    /// Owning entity within the file.
    pub owner: String,
}

impl SearchResult {
    /// Citation in `path:start-end` form.
    pub fn citation(&self) -> String {
        format!("{}:{}-{}", self.path, self.start_line, self.end_line)
    }
}

/// Statistics about the indexed graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    /// Node counts keyed by node label.
    pub nodes: BTreeMap<String, usize>,
    /// Number of relationships.
    pub edges: usize,
    /// Vectors in the index.
    pub vectors: usize,
    /// Chunks still waiting for a vector.
    pub pending_embeddings: usize,
    /// Chunks whose batch failed.
    pub failed_embeddings: usize,
}

impl IndexStats {
    pub fn count(&self, label: &str) -> usize {
        self.nodes.get(label).copied().unwrap_or(0)
    }
}
