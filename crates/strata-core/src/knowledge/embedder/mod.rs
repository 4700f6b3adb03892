//! Embedding generation for semantic search.
//!
//! An [`Embedder`] turns texts into vectors through one provider. The
//! [`EmbeddingGenerator`] drives it for an ingestion run: batching, bounded
//! concurrency, per-request timeouts, retries with exponential backoff and
//! the dimension check that guards the vector index.

#[cfg(feature = "local-embeddings")]
mod local;
mod generator;
mod openai;

#[cfg(feature = "local-embeddings")]
pub use local::FastEmbedder;
pub use generator::{EmbeddingGenerator, EmbeddingRun};
pub use openai::OpenAIEmbedder;

use async_trait::async_trait;
use std::sync::Arc;

use super::error::KnowledgeError;
use crate::config::EmbeddingConfig;

/// Trait for embedding generation.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embeddings for a batch of text, one vector per input.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KnowledgeError>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;

    /// Get the model name.
    fn model_name(&self) -> &str;
}

/// Build the embedder selected by the configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, KnowledgeError> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIEmbedder::from_config(config)?)),
        #[cfg(feature = "local-embeddings")]
        "fastembed" => Ok(Arc::new(FastEmbedder::from_config(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "fastembed" => Err(KnowledgeError::Configuration(
            "the fastembed provider needs the `local-embeddings` feature".into(),
        )),
        other => Err(KnowledgeError::Configuration(format!(
            "unknown embedding provider '{}'",
            other
        ))),
    }
}
