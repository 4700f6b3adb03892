#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use strata_core::config::{Config, GraphConfig};
use strata_core::ingest::{LocalSource, LOCAL_BRANCH};
use strata_core::knowledge::{
    Embedder, EmbeddingGenerator, GraphDb, KnowledgeError, KnowledgeGraph, RepositoryRef,
};
use strata_core::{IngestRequest, Ingestor, JobStatus};
use tempfile::TempDir;

pub const DIMS: usize = 16;

pub const A_PY: &str = "from b import Bar\n\n\ndef foo():\n    return Bar()\n";

pub const B_PY: &str = "class Bar:\n    def baz(self):\n        return 42\n";

pub const README: &str = "# Shop\n\nA tiny shop used in tests.\n\n## Usage\n\nCall `foo()`.\n";

/// Deterministic bag-of-words embedder.
///
/// Batches containing `fail_marker` fail with a retryable error on every
/// attempt.
pub struct HashEmbedder {
    dims: usize,
    fail_marker: Option<String>,
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            fail_marker: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_on(dims: usize, marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            ..Self::new(dims)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn hash_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in word.to_lowercase().bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        v[(h % dims as u64) as usize] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        v[0] = 1.0;
    } else {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KnowledgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_marker {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                return Err(KnowledgeError::retryable_embedding("rate limited"));
            }
        }
        Ok(texts.iter().map(|t| hash_vector(t, self.dims)).collect())
    }

    fn dimension(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "hash-test"
    }
}

pub fn test_config(dims: usize) -> Config {
    let mut config = Config::default();
    config.graph = GraphConfig::in_memory();
    config.embedding.dimensions = dims;
    config.embedding.batch_size = 4;
    config.embedding.concurrency = 2;
    config.embedding.max_attempts = 2;
    config.embedding.initial_backoff_ms = 1;
    config.embedding.request_timeout_secs = 5;
    config.ingestion.parse_workers = 2;
    config
}

pub fn write_file(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(full, content).unwrap();
}

/// A plain-directory repository ingested into an in-memory store.
pub struct Harness {
    pub dir: TempDir,
    pub url: String,
    pub config: Config,
    pub db: Arc<GraphDb>,
    pub embedder: Arc<HashEmbedder>,
    pub ingestor: Arc<Ingestor>,
}

impl Harness {
    pub async fn new(files: &[(&str, &str)]) -> Self {
        Self::with_embedder(files, HashEmbedder::new(DIMS)).await
    }

    pub async fn with_embedder(files: &[(&str, &str)], embedder: HashEmbedder) -> Self {
        let dir = tempfile::Builder::new().prefix("strata-repo").tempdir().unwrap();
        for (path, content) in files {
            write_file(dir.path(), path, content);
        }
        let url = dir.path().to_string_lossy().to_string();
        let config = test_config(DIMS);
        let db = Arc::new(GraphDb::in_memory().await.unwrap());
        let embedder = Arc::new(embedder);
        let ingestor = Arc::new(ingestor_for(&config, &db, embedder.clone()));
        Self {
            dir,
            url,
            config,
            db,
            embedder,
            ingestor,
        }
    }

    pub fn request(&self) -> IngestRequest {
        IngestRequest::new(self.url.clone())
    }

    pub fn repo_key(&self) -> String {
        RepositoryRef::new(&self.url, LOCAL_BRANCH).key()
    }

    pub fn write(&self, path: &str, content: &str) {
        write_file(self.dir.path(), path, content);
    }

    pub fn remove(&self, path: &str) {
        std::fs::remove_file(self.dir.path().join(path)).unwrap();
    }

    pub fn knowledge(&self) -> KnowledgeGraph {
        KnowledgeGraph::new(self.db.clone(), Arc::new(generator(&self.config, self.embedder.clone())))
    }

    /// Another ingestor over the same store with its own embedder and dimension.
    pub fn ingestor_with(&self, embedder: HashEmbedder, dims: usize) -> Ingestor {
        let mut config = self.config.clone();
        config.embedding.dimensions = dims;
        ingestor_for(&config, &self.db, Arc::new(embedder))
    }
}

pub fn generator(config: &Config, embedder: Arc<dyn Embedder>) -> EmbeddingGenerator {
    EmbeddingGenerator::new(embedder, &config.embedding)
}

pub fn ingestor_for(config: &Config, db: &Arc<GraphDb>, embedder: Arc<dyn Embedder>) -> Ingestor {
    Ingestor::new(
        config.ingestion.clone(),
        db.clone(),
        Arc::new(generator(config, embedder)),
        Arc::new(LocalSource::new(config.ingestion.exclude_dirs.clone())),
    )
}

/// Poll a job until it reaches a terminal stage.
pub async fn wait_for(ingestor: &Ingestor, job_id: &str) -> JobStatus {
    for _ in 0..2000 {
        let status = ingestor.status(job_id).await.unwrap();
        if status.stage.is_terminal() {
            return status;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("job {} did not finish", job_id);
}
