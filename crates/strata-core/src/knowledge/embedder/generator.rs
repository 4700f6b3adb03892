//! Batched embedding with retries and dimension validation.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use super::Embedder;
use crate::config::{EmbeddingConfig, MAX_EMBEDDING_BACKOFF_MS};
use crate::knowledge::error::KnowledgeError;

/// Result of embedding a run's texts.
#[derive(Debug, Default)]
pub struct EmbeddingRun {
    /// One entry per input text; `None` where the batch failed.
    pub vectors: Vec<Option<Vec<f32>>>,
    pub failed_batches: usize,
    pub total_batches: usize,
}

impl EmbeddingRun {
    pub fn embedded(&self) -> usize {
        self.vectors.iter().filter(|v| v.is_some()).count()
    }

    pub fn failed(&self) -> usize {
        self.vectors.len() - self.embedded()
    }
}

/// Drives an [`Embedder`] over many texts.
pub struct EmbeddingGenerator {
    embedder: Arc<dyn Embedder>,
    dimensions: usize,
    batch_size: usize,
    concurrency: usize,
    max_attempts: u32,
    initial_backoff: Duration,
    timeout: Duration,
}

impl EmbeddingGenerator {
    pub fn new(embedder: Arc<dyn Embedder>, config: &EmbeddingConfig) -> Self {
        Self {
            embedder,
            dimensions: config.dimensions,
            batch_size: config.batch_size.max(1),
            concurrency: config.concurrency.max(1),
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff(),
            timeout: config.request_timeout(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    /// Fail when the provider's declared dimension differs from the
    /// configured one.
    pub fn check_dimensions(&self) -> Result<(), KnowledgeError> {
        let actual = self.embedder.dimension();
        if actual != self.dimensions {
            return Err(dimension_mismatch(self.embedder.model_name(), actual, self.dimensions));
        }
        Ok(())
    }

    /// Embed texts in batches, all or nothing. Used for query vectors.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KnowledgeError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }

    /// Embed texts for an ingestion run.
    ///
    /// A batch that exhausts its attempts leaves `None` for its texts and
    /// the other batches proceed. A dimension mismatch or cancellation ends
    /// the whole run with an error.
    pub async fn embed_batches(
        &self,
        texts: &[String],
        is_cancelled: &(dyn Fn() -> bool + Sync),
    ) -> Result<EmbeddingRun, KnowledgeError> {
        let batches: Vec<&[String]> = texts.chunks(self.batch_size).collect();
        let total_batches = batches.len();

        let requests: Vec<BoxFuture<'_, Result<Vec<Vec<f32>>, KnowledgeError>>> = batches
            .iter()
            .copied()
            .enumerate()
            .map(|(idx, batch)| {
                async move {
                    if is_cancelled() {
                        return Err(KnowledgeError::Cancelled);
                    }
                    let result = self.embed_batch(batch).await;
                    debug!(batch = idx, size = batch.len(), ok = result.is_ok(), "Embedding batch done");
                    result
                }
                .boxed()
            })
            .collect();
        let outcomes: Vec<Result<Vec<Vec<f32>>, KnowledgeError>> =
            stream::iter(requests).buffered(self.concurrency).collect().await;

        let mut run = EmbeddingRun {
            vectors: Vec::with_capacity(texts.len()),
            failed_batches: 0,
            total_batches,
        };
        for (batch, outcome) in batches.iter().zip(outcomes) {
            match outcome {
                Ok(vectors) => run.vectors.extend(vectors.into_iter().map(Some)),
                Err(e @ KnowledgeError::Configuration(_)) | Err(e @ KnowledgeError::Cancelled) => {
                    return Err(e)
                }
                Err(e) => {
                    warn!(size = batch.len(), error = %e, "Embedding batch failed, its chunks stay without vectors");
                    run.failed_batches += 1;
                    run.vectors.extend(std::iter::repeat(None).take(batch.len()));
                }
            }
        }

        Ok(run)
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, KnowledgeError> {
        let mut delay = self.initial_backoff;
        let mut attempt = 1;

        loop {
            let result = match tokio::time::timeout(self.timeout, self.embedder.embed(batch)).await {
                Ok(result) => result,
                Err(_) => Err(KnowledgeError::retryable_embedding(format!(
                    "request timed out after {}s",
                    self.timeout.as_secs()
                ))),
            };

            match result {
                Ok(vectors) => {
                    self.validate(batch.len(), &vectors)?;
                    return Ok(vectors);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Embedding request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_millis(MAX_EMBEDDING_BACKOFF_MS));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn validate(&self, expected: usize, vectors: &[Vec<f32>]) -> Result<(), KnowledgeError> {
        if vectors.len() != expected {
            return Err(KnowledgeError::terminal_embedding(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                expected
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimensions) {
            return Err(dimension_mismatch(self.embedder.model_name(), bad.len(), self.dimensions));
        }
        Ok(())
    }
}

fn dimension_mismatch(model: &str, actual: usize, configured: usize) -> KnowledgeError {
    KnowledgeError::Configuration(format!(
        "embedding model '{}' produces {}-dimension vectors but EMBEDDING_DIMENSIONS is {}",
        model, actual, configured
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` calls containing `poison`, then succeeds.
    struct FlakyEmbedder {
        dims: usize,
        poison: Option<&'static str>,
        failures: usize,
        retryable: bool,
        calls: AtomicUsize,
    }

    impl FlakyEmbedder {
        fn new(dims: usize) -> Self {
            Self {
                dims,
                poison: None,
                failures: 0,
                retryable: true,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KnowledgeError> {
            let poisoned = self
                .poison
                .is_some_and(|p| texts.iter().any(|t| t == p));
            if poisoned && self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(if self.retryable {
                    KnowledgeError::retryable_embedding("429 Too Many Requests")
                } else {
                    KnowledgeError::terminal_embedding("401 Unauthorized")
                });
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32; self.dims]).collect())
        }

        fn dimension(&self) -> usize {
            self.dims
        }

        fn model_name(&self) -> &str {
            "flaky"
        }
    }

    fn config(dims: usize, batch_size: usize, max_attempts: u32) -> EmbeddingConfig {
        EmbeddingConfig {
            dimensions: dims,
            batch_size,
            max_attempts,
            initial_backoff_ms: 1,
            ..EmbeddingConfig::default()
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text {}", i)).collect()
    }

    #[tokio::test]
    async fn test_batches_preserve_order() {
        let generator = EmbeddingGenerator::new(Arc::new(FlakyEmbedder::new(4)), &config(4, 3, 1));
        let run = generator.embed_batches(&texts(7), &|| false).await.unwrap();
        assert_eq!(run.total_batches, 3);
        assert_eq!(run.embedded(), 7);
        assert_eq!(run.vectors[6].as_ref().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_retry_recovers_rate_limited_batch() {
        let mut embedder = FlakyEmbedder::new(4);
        embedder.poison = Some("text 1");
        embedder.failures = 2;
        let embedder = Arc::new(embedder);

        let generator = EmbeddingGenerator::new(embedder.clone(), &config(4, 2, 3));
        let run = generator.embed_batches(&texts(4), &|| false).await.unwrap();
        assert_eq!(run.failed_batches, 0);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_batch_fails_alone() {
        let mut embedder = FlakyEmbedder::new(4);
        embedder.poison = Some("text 2");
        embedder.failures = usize::MAX;
        let generator = EmbeddingGenerator::new(Arc::new(embedder), &config(4, 2, 3));

        let run = generator.embed_batches(&texts(6), &|| false).await.unwrap();
        assert_eq!(run.failed_batches, 1);
        assert_eq!(run.failed(), 2);
        assert!(run.vectors[2].is_none() && run.vectors[3].is_none());
        assert!(run.vectors[4].is_some());
    }

    #[tokio::test]
    async fn test_terminal_error_is_not_retried() {
        let mut embedder = FlakyEmbedder::new(4);
        embedder.poison = Some("text 0");
        embedder.failures = usize::MAX;
        embedder.retryable = false;
        let embedder = Arc::new(embedder);

        let generator = EmbeddingGenerator::new(embedder.clone(), &config(4, 10, 5));
        let run = generator.embed_batches(&texts(3), &|| false).await.unwrap();
        assert_eq!(run.failed_batches, 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_fatal() {
        let generator = EmbeddingGenerator::new(Arc::new(FlakyEmbedder::new(8)), &config(4, 2, 3));
        assert!(matches!(generator.check_dimensions(), Err(KnowledgeError::Configuration(_))));

        let err = generator.embed_batches(&texts(3), &|| false).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_cancellation_stops_run() {
        let generator = EmbeddingGenerator::new(Arc::new(FlakyEmbedder::new(4)), &config(4, 1, 1));
        let err = generator.embed_batches(&texts(3), &|| true).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::Cancelled));
    }
}
