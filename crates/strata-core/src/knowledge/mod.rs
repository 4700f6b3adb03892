//! Code knowledge graph: structure, chunks and vectors of ingested repositories.
//!
//! This module provides repository-scoped code intelligence with:
//! - **Structural parsing** of Python, Go, C#, Java, JavaScript/TypeScript,
//!   Markdown, YAML and Protobuf, with a generic fallback
//! - **Graph storage** of Repository -> File -> {Function, Class} -> CodeChunk
//!   containment in SurrealDB, keyed by natural identity
//! - **Semantic search** over chunk embeddings, scoped to one repository
//! - **Service detection** from code directories and deployment manifests
//!
//! # Components
//!
//! - [`KnowledgeGraph`] - Query facade implementing [`KnowledgeStore`]
//! - [`GraphDb`] - SurrealDB store with the HNSW vector index
//! - [`parser::ParserRegistry`] - Language dispatch over [`parser::Parser`]s
//! - [`Chunker`] - Line-preserving chunking
//! - [`EmbeddingGenerator`] - Batched embedding with retries
//! - [`GraphLoader`] - Ontology-ordered idempotent writes
//! - [`OntologyRepair`] - Containment verification and repair
//! - [`services::detect_services`] - Services and their files
//!
//! # Example
//!
//! ```ignore
//! use strata_core::knowledge::{KnowledgeGraph, KnowledgeStore};
//!
//! let kg = KnowledgeGraph::open(&config).await?;
//! let hits = kg.search(&repo_key, "where are orders persisted", 10).await?;
//! for hit in hits {
//!     println!("{} ({:.2})", hit.citation(), hit.score);
//! }
//! ```

pub mod chunker;
mod db;
pub mod embedder;
mod error;
pub mod identity;
pub mod loader;
pub mod models;
pub mod ontology;
pub mod parser;
pub mod repair;
pub mod resolve;
pub mod services;

pub use chunker::{Chunk, Chunker};
pub use db::GraphDb;
pub use embedder::{create_embedder, Embedder, EmbeddingGenerator, EmbeddingRun};
pub use error::KnowledgeError;
pub use identity::RepositoryRef;
pub use loader::{FileLoad, GraphLoader, LoadReport, ServiceReport, VectorUpdate};
pub use models::{
    ClassNode, CodeChunk, FileNode, FunctionNode, IndexStats, RepairReport, RepositoryNode,
    RepositoryStatus, RepositorySummary, SearchResult, ServiceNode, VerificationReport,
};
pub use ontology::{EdgeKind, EdgeRecord, NodeKind};
pub use repair::OntologyRepair;
pub use services::DetectedServices;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;

/// Queries the agent layer issues against ingested repositories.
///
/// Every query is scoped to one repository key (`<url>@<branch>`).
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Chunks most similar to a natural-language query, best first.
    async fn search(&self, repo: &str, query: &str, limit: usize) -> Result<Vec<SearchResult>, KnowledgeError>;

    /// Chunks most similar to a query vector, best first.
    async fn search_by_vector(
        &self,
        repo: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>, KnowledgeError>;

    /// Functions declared in a file, in source order.
    async fn functions_in_file(&self, repo: &str, path: &str) -> Result<Vec<FunctionNode>, KnowledgeError>;

    /// Classes declaring `name` as a base class or interface.
    async fn subclasses_of(&self, repo: &str, name: &str) -> Result<Vec<ClassNode>, KnowledgeError>;

    /// Detected services, by name. Empty unless service detection ran.
    async fn services(&self, repo: &str) -> Result<Vec<ServiceNode>, KnowledgeError>;

    /// Every ingested repository.
    async fn list_repositories(&self) -> Result<Vec<RepositorySummary>, KnowledgeError>;

    /// Counts for one repository or, with `None`, the whole store.
    async fn stats(&self, repo: Option<&str>) -> Result<IndexStats, KnowledgeError>;
}

/// The main query implementation.
pub struct KnowledgeGraph {
    db: Arc<GraphDb>,
    generator: Arc<EmbeddingGenerator>,
}

impl KnowledgeGraph {
    pub fn new(db: Arc<GraphDb>, generator: Arc<EmbeddingGenerator>) -> Self {
        Self { db, generator }
    }

    /// Connect to the configured store and embedding provider.
    pub async fn open(config: &Config) -> Result<Self, KnowledgeError> {
        let db = GraphDb::connect(&config.graph).await?;
        let embedder = create_embedder(&config.embedding)?;
        let generator = EmbeddingGenerator::new(embedder, &config.embedding);
        Ok(Self::new(Arc::new(db), Arc::new(generator)))
    }

    pub fn db(&self) -> &Arc<GraphDb> {
        &self.db
    }

    pub fn generator(&self) -> &Arc<EmbeddingGenerator> {
        &self.generator
    }

    async fn require_repository(&self, repo: &str) -> Result<RepositoryNode, KnowledgeError> {
        self.db
            .get_repository(repo)
            .await?
            .ok_or_else(|| KnowledgeError::EntityNotFound(format!("repository {}", repo)))
    }
}

#[async_trait]
impl KnowledgeStore for KnowledgeGraph {
    async fn search(&self, repo: &str, query: &str, limit: usize) -> Result<Vec<SearchResult>, KnowledgeError> {
        self.require_repository(repo).await?;
        let embedding = self
            .generator
            .embed(&[query.to_string()])
            .await?
            .pop()
            .ok_or_else(|| KnowledgeError::terminal_embedding("provider returned no vector for the query"))?;
        self.db.search(repo, &embedding, limit).await
    }

    async fn search_by_vector(
        &self,
        repo: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>, KnowledgeError> {
        self.require_repository(repo).await?;
        self.db.search(repo, embedding, limit).await
    }

    async fn functions_in_file(&self, repo: &str, path: &str) -> Result<Vec<FunctionNode>, KnowledgeError> {
        self.db.functions_in_file(repo, &identity::normalize_path(path)).await
    }

    async fn subclasses_of(&self, repo: &str, name: &str) -> Result<Vec<ClassNode>, KnowledgeError> {
        self.db.subclasses_of(repo, name).await
    }

    async fn services(&self, repo: &str) -> Result<Vec<ServiceNode>, KnowledgeError> {
        self.require_repository(repo).await?;
        self.db.services(repo).await
    }

    async fn list_repositories(&self) -> Result<Vec<RepositorySummary>, KnowledgeError> {
        Ok(self
            .db
            .list_repositories()
            .await?
            .iter()
            .map(RepositorySummary::from)
            .collect())
    }

    async fn stats(&self, repo: Option<&str>) -> Result<IndexStats, KnowledgeError> {
        self.db.stats(repo).await
    }
}
