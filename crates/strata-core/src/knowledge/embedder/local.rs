//! Local embeddings through fastembed (ONNX runtime).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::knowledge::error::KnowledgeError;

/// FastEmbed-based embedder, BGE-Small by default.
pub struct FastEmbedder {
    model: Arc<TextEmbedding>,
    dimension: usize,
    model_name: String,
}

impl FastEmbedder {
    /// Create an embedder for the configured model code.
    /// Uses `~/.strata/cache/` as the model cache directory.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, KnowledgeError> {
        let code = config.model_or_default();
        let model = resolve_model(&code)?;
        Self::with_model_and_cache(model, code, Self::default_cache_dir())
    }

    /// Create a new FastEmbed embedder with a specific model and cache directory.
    pub fn with_model_and_cache(
        model: EmbeddingModel,
        model_name: String,
        cache_dir: PathBuf,
    ) -> Result<Self, KnowledgeError> {
        std::fs::create_dir_all(&cache_dir).map_err(|e| {
            KnowledgeError::Configuration(format!("Failed to create cache directory: {}", e))
        })?;

        let text_embedding = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(true),
        )
        .map_err(|e| KnowledgeError::Configuration(format!("Failed to load embedding model: {}", e)))?;

        // Get dimension from a test embedding
        let sample = text_embedding
            .embed(vec!["test"], None)
            .map_err(|e| KnowledgeError::terminal_embedding(e.to_string()))?;
        let dimension = sample.first().map(|v| v.len()).unwrap_or(0);

        Ok(Self {
            model: Arc::new(text_embedding),
            dimension,
            model_name,
        })
    }

    /// Get the default cache directory: `~/.strata/cache/`
    fn default_cache_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".strata")
            .join("cache")
    }
}

fn resolve_model(code: &str) -> Result<EmbeddingModel, KnowledgeError> {
    TextEmbedding::list_supported_models()
        .into_iter()
        .find(|info| info.model_code.eq_ignore_ascii_case(code))
        .map(|info| info.model)
        .ok_or_else(|| KnowledgeError::Configuration(format!("unsupported fastembed model '{}'", code)))
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KnowledgeError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || model.embed(texts, None))
            .await
            .map_err(|e| KnowledgeError::terminal_embedding(e.to_string()))?
            .map_err(|e| KnowledgeError::terminal_embedding(e.to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model() {
        assert!(resolve_model("BAAI/bge-small-en-v1.5").is_ok());
        assert!(matches!(
            resolve_model("no/such-model"),
            Err(KnowledgeError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_embedder_dimension() {
        // This test requires downloading the model, so we skip it in CI
        if std::env::var("CI").is_ok() {
            return;
        }

        let embedder = FastEmbedder::from_config(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.dimension(), 384);
        let vectors = embedder.embed(&["fn main() {}".to_string()]).await.unwrap();
        assert_eq!(vectors[0].len(), 384);
    }
}
