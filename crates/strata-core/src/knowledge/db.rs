//! SurrealDB graph store for the knowledge graph.
//!
//! Every node lives in its kind's table under a record id derived from its
//! natural key, so writes are `UPSERT`s and re-running a load never
//! duplicates. Relationships are records in the `edge` table keyed the same
//! way by (source, kind, target). Chunk vectors live in `chunk_vector`,
//! which carries the HNSW index whose dimension is recorded in `meta`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::engine::any::{self, Any};
use surrealdb::opt::auth::Root;
use surrealdb::{Response, Surreal};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use super::error::KnowledgeError;
use super::identity::record_id;
use super::models::{
    ApiEndpointNode, ChunkVector, ClassNode, CodeChunk, DataModelNode, EmbeddingStatus, FileNode,
    FunctionNode, IndexStats, RepositoryNode, SearchResult, ServiceNode,
};
use super::ontology::{EdgeRecord, NodeKind};
use super::resolve::simple_name;
use crate::config::{GraphConfig, DEFAULT_GRAPH_RETRY_BACKOFF_MS, SEARCH_PREVIEW_CHARS};

const EDGE_TABLE: &str = "edge";
const VECTOR_TABLE: &str = "chunk_vector";
const META_TABLE: &str = "meta";
const VECTOR_INDEX_META: &str = "vector_index";

/// Tables holding per-file entities, deleted when a file's subtree is replaced.
const FILE_SCOPED_TABLES: [&str; 5] = ["function", "class", "api_endpoint", "data_model", "chunk"];

#[derive(Deserialize)]
struct CountResult {
    count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorIndexMeta {
    dimensions: usize,
    created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Deserialize)]
struct VectorHit {
    chunk: String,
    score: f32,
}

/// Database connection for the knowledge graph.
pub struct GraphDb {
    db: Surreal<Any>,
    write_retries: u32,
    index_dimensions: RwLock<Option<usize>>,
    repo_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl GraphDb {
    /// Connect to the configured endpoint and make sure the schema exists.
    pub async fn connect(config: &GraphConfig) -> Result<Self, KnowledgeError> {
        if let Some(path) = config.endpoint.strip_prefix("rocksdb://") {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| KnowledgeError::io(parent, e))?;
                }
            }
        }

        let db = any::connect(config.endpoint.as_str()).await?;
        if config.is_remote() {
            if let (Some(username), Some(password)) = (&config.username, &config.password) {
                db.signin(Root {
                    username: username.as_str(),
                    password: password.as_str(),
                })
                .await?;
            }
        }
        db.use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await?;

        let graph = Self {
            db,
            write_retries: config.write_retries.max(1),
            index_dimensions: RwLock::new(None),
            repo_locks: Mutex::new(HashMap::new()),
        };
        graph.initialize_schema().await?;
        debug!(endpoint = %config.endpoint, "Connected to graph store");
        Ok(graph)
    }

    /// Ephemeral store, used by tests and dry runs.
    pub async fn in_memory() -> Result<Self, KnowledgeError> {
        Self::connect(&GraphConfig::in_memory()).await
    }

    /// Define tables and lookup indexes. Safe to run repeatedly.
    pub async fn initialize_schema(&self) -> Result<(), KnowledgeError> {
        // ===========================================================================
        // NODE TABLES
        // ===========================================================================

        self.execute(
            r#"
            DEFINE TABLE IF NOT EXISTS repository SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS repository_key ON repository FIELDS key UNIQUE;

            DEFINE TABLE IF NOT EXISTS file SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS file_key ON file FIELDS key UNIQUE;
            DEFINE INDEX IF NOT EXISTS file_repo_path ON file FIELDS repo, path;

            DEFINE TABLE IF NOT EXISTS function SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS function_key ON function FIELDS key UNIQUE;
            DEFINE INDEX IF NOT EXISTS function_file ON function FIELDS repo, file_path;

            DEFINE TABLE IF NOT EXISTS class SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS class_key ON class FIELDS key UNIQUE;
            DEFINE INDEX IF NOT EXISTS class_file ON class FIELDS repo, file_path;
            DEFINE INDEX IF NOT EXISTS class_name ON class FIELDS repo, name;

            DEFINE TABLE IF NOT EXISTS api_endpoint SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS api_endpoint_key ON api_endpoint FIELDS key UNIQUE;
            DEFINE INDEX IF NOT EXISTS api_endpoint_file ON api_endpoint FIELDS repo, file_path;

            DEFINE TABLE IF NOT EXISTS data_model SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS data_model_key ON data_model FIELDS key UNIQUE;
            DEFINE INDEX IF NOT EXISTS data_model_file ON data_model FIELDS repo, file_path;

            DEFINE TABLE IF NOT EXISTS chunk SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS chunk_key ON chunk FIELDS key UNIQUE;
            DEFINE INDEX IF NOT EXISTS chunk_file ON chunk FIELDS repo, file_path;

            DEFINE TABLE IF NOT EXISTS service SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS service_key ON service FIELDS key UNIQUE;
            DEFINE INDEX IF NOT EXISTS service_repo ON service FIELDS repo, name;
            "#,
            Vec::new(),
        )
        .await?;

        // ===========================================================================
        // EDGES, VECTORS, METADATA
        // ===========================================================================

        self.execute(
            r#"
            DEFINE TABLE IF NOT EXISTS edge SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS edge_key ON edge FIELDS key UNIQUE;
            DEFINE INDEX IF NOT EXISTS edge_src ON edge FIELDS repo, src;
            DEFINE INDEX IF NOT EXISTS edge_dst ON edge FIELDS repo, dst;
            DEFINE INDEX IF NOT EXISTS edge_origin ON edge FIELDS repo, origin;

            DEFINE TABLE IF NOT EXISTS chunk_vector SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS chunk_vector_repo ON chunk_vector FIELDS repo;

            DEFINE TABLE IF NOT EXISTS meta SCHEMALESS;
            DEFINE TABLE IF NOT EXISTS job SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS job_repo ON job FIELDS repo;
            "#,
            Vec::new(),
        )
        .await?;

        Ok(())
    }

    /// Serialize graph writes for one repository.
    pub async fn lock_repository(&self, repo: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.repo_locks.lock().await;
            Arc::clone(locks.entry(repo.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    // ===========================================================================
    // QUERY EXECUTION
    // ===========================================================================

    /// Run a query, retrying transient failures with a doubling delay.
    async fn execute(
        &self,
        sql: &str,
        binds: Vec<(&'static str, Value)>,
    ) -> Result<Response, KnowledgeError> {
        let mut delay = Duration::from_millis(DEFAULT_GRAPH_RETRY_BACKOFF_MS);
        let mut attempt = 1;

        loop {
            let mut query = self.db.query(sql);
            for (name, value) in &binds {
                query = query.bind((*name, value.clone()));
            }

            match query.await.and_then(|response| response.check()) {
                Ok(response) => return Ok(response),
                Err(e) => {
                    let err = KnowledgeError::from(e);
                    if !err.is_retryable() || attempt >= self.write_retries {
                        return Err(err);
                    }
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "Graph write failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        sql: &str,
        binds: Vec<(&'static str, Value)>,
    ) -> Result<Vec<T>, KnowledgeError> {
        let mut response = self.execute(sql, binds).await?;
        Ok(response.take(0)?)
    }

    async fn count(&self, sql: &str, binds: Vec<(&'static str, Value)>) -> Result<usize, KnowledgeError> {
        let mut response = self.execute(sql, binds).await?;
        let result: Option<CountResult> = response.take(0)?;
        Ok(result.map(|r| r.count.max(0) as usize).unwrap_or(0))
    }

    // ===========================================================================
    // GENERIC RECORDS
    // ===========================================================================

    /// Insert or replace the record stored under a natural key.
    pub async fn upsert_record<T: Serialize>(
        &self,
        table: &'static str,
        key: &str,
        record: &T,
    ) -> Result<(), KnowledgeError> {
        self.execute(
            "UPSERT type::thing($tb, $id) CONTENT $data RETURN NONE",
            vec![
                ("tb", Value::from(table)),
                ("id", Value::from(record_id(key))),
                ("data", to_value(record)?),
            ],
        )
        .await?;
        Ok(())
    }

    /// Merge fields into an existing record; does nothing when it is missing.
    pub async fn merge_record(
        &self,
        table: &'static str,
        key: &str,
        fields: Value,
    ) -> Result<(), KnowledgeError> {
        self.execute(
            "UPDATE type::thing($tb, $id) MERGE $data RETURN NONE",
            vec![
                ("tb", Value::from(table)),
                ("id", Value::from(record_id(key))),
                ("data", fields),
            ],
        )
        .await?;
        Ok(())
    }

    /// Read the record stored under a natural key.
    pub async fn get_record<T: DeserializeOwned>(
        &self,
        table: &'static str,
        key: &str,
    ) -> Result<Option<T>, KnowledgeError> {
        let rows: Vec<T> = self
            .fetch(
                "SELECT * OMIT id FROM type::thing($tb, $id)",
                vec![("tb", Value::from(table)), ("id", Value::from(record_id(key)))],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    /// All records of a table belonging to a repository.
    pub async fn list_records<T: DeserializeOwned>(
        &self,
        table: &'static str,
        repo: &str,
    ) -> Result<Vec<T>, KnowledgeError> {
        self.fetch(
            &format!("SELECT * OMIT id FROM {} WHERE repo = $repo", table),
            vec![("repo", Value::from(repo))],
        )
        .await
    }

    pub async fn upsert_node<T: Serialize>(
        &self,
        kind: NodeKind,
        key: &str,
        node: &T,
    ) -> Result<(), KnowledgeError> {
        self.upsert_record(kind.table(), key, node).await
    }

    pub async fn upsert_edge(&self, edge: &EdgeRecord) -> Result<(), KnowledgeError> {
        self.upsert_record(EDGE_TABLE, &edge.key, edge).await
    }

    pub async fn delete_edge(&self, key: &str) -> Result<(), KnowledgeError> {
        self.execute(
            "DELETE type::thing($tb, $id)",
            vec![("tb", Value::from(EDGE_TABLE)), ("id", Value::from(record_id(key)))],
        )
        .await?;
        Ok(())
    }

    pub async fn edges(&self, repo: &str) -> Result<Vec<EdgeRecord>, KnowledgeError> {
        self.list_records(EDGE_TABLE, repo).await
    }

    /// Natural keys of every node of a kind in a repository.
    pub async fn node_keys(&self, kind: NodeKind, repo: &str) -> Result<Vec<String>, KnowledgeError> {
        if kind == NodeKind::Repository {
            let rows: Vec<String> = self
                .fetch(
                    "SELECT VALUE key FROM repository WHERE key = $repo",
                    vec![("repo", Value::from(repo))],
                )
                .await?;
            return Ok(rows);
        }
        self.fetch(
            &format!("SELECT VALUE key FROM {} WHERE repo = $repo", kind.table()),
            vec![("repo", Value::from(repo))],
        )
        .await
    }

    // ===========================================================================
    // REPOSITORIES
    // ===========================================================================

    pub async fn get_repository(&self, key: &str) -> Result<Option<RepositoryNode>, KnowledgeError> {
        self.get_record(NodeKind::Repository.table(), key).await
    }

    pub async fn upsert_repository(&self, repo: &RepositoryNode) -> Result<(), KnowledgeError> {
        self.upsert_record(NodeKind::Repository.table(), &repo.key, repo).await
    }

    pub async fn list_repositories(&self) -> Result<Vec<RepositoryNode>, KnowledgeError> {
        self.fetch("SELECT * OMIT id FROM repository ORDER BY key", Vec::new())
            .await
    }

    // ===========================================================================
    // FILES AND ENTITIES
    // ===========================================================================

    /// Content hash of every loaded file, keyed by path.
    pub async fn file_hashes(&self, repo: &str) -> Result<HashMap<String, String>, KnowledgeError> {
        #[derive(Deserialize)]
        struct Row {
            path: String,
            content_hash: String,
        }

        let rows: Vec<Row> = self
            .fetch(
                "SELECT path, content_hash FROM file WHERE repo = $repo",
                vec![("repo", Value::from(repo))],
            )
            .await?;
        Ok(rows.into_iter().map(|r| (r.path, r.content_hash)).collect())
    }

    pub async fn files(&self, repo: &str) -> Result<Vec<FileNode>, KnowledgeError> {
        self.list_records(NodeKind::File.table(), repo).await
    }

    pub async fn functions_in_file(&self, repo: &str, path: &str) -> Result<Vec<FunctionNode>, KnowledgeError> {
        self.fetch(
            "SELECT * OMIT id FROM function WHERE repo = $repo AND file_path = $path ORDER BY start_line",
            vec![("repo", Value::from(repo)), ("path", Value::from(path))],
        )
        .await
    }

    pub async fn classes(&self, repo: &str) -> Result<Vec<ClassNode>, KnowledgeError> {
        self.list_records(NodeKind::Class.table(), repo).await
    }

    /// Classes that name `name` among their declared superclasses, written
    /// plainly or qualified (`models.Model` matches `Model`).
    pub async fn subclasses_of(&self, repo: &str, name: &str) -> Result<Vec<ClassNode>, KnowledgeError> {
        let wanted = simple_name(name);
        let mut classes: Vec<ClassNode> = self
            .classes(repo)
            .await?
            .into_iter()
            .filter(|c| c.superclasses.iter().any(|s| s == name || simple_name(s) == wanted))
            .collect();
        classes.sort_by(|a, b| (&a.file_path, &a.name).cmp(&(&b.file_path, &b.name)));
        Ok(classes)
    }

    pub async fn functions(&self, repo: &str) -> Result<Vec<FunctionNode>, KnowledgeError> {
        self.list_records(NodeKind::Function.table(), repo).await
    }

    pub async fn endpoints(&self, repo: &str) -> Result<Vec<ApiEndpointNode>, KnowledgeError> {
        self.list_records(NodeKind::ApiEndpoint.table(), repo).await
    }

    pub async fn data_models(&self, repo: &str) -> Result<Vec<DataModelNode>, KnowledgeError> {
        self.list_records(NodeKind::DataModel.table(), repo).await
    }

    pub async fn chunks(&self, repo: &str) -> Result<Vec<CodeChunk>, KnowledgeError> {
        self.list_records(NodeKind::CodeChunk.table(), repo).await
    }

    /// Chunks without a stored vector, pending or failed.
    pub async fn chunks_needing_vectors(&self, repo: &str) -> Result<Vec<CodeChunk>, KnowledgeError> {
        self.fetch(
            "SELECT * OMIT id FROM chunk WHERE repo = $repo AND embedding_status != 'embedded' ORDER BY file_path, start_line",
            vec![("repo", Value::from(repo))],
        )
        .await
    }

    pub async fn chunks_in_file(&self, repo: &str, path: &str) -> Result<Vec<CodeChunk>, KnowledgeError> {
        self.fetch(
            "SELECT * OMIT id FROM chunk WHERE repo = $repo AND file_path = $path ORDER BY start_line, end_line",
            vec![("repo", Value::from(repo)), ("path", Value::from(path))],
        )
        .await
    }

    /// Delete everything loaded from one file: its entities, chunks, vectors
    /// and the edges it produced. Shared protobuf definitions stay until
    /// [`GraphDb::sweep_logical_orphans`] finds no file containing them.
    /// With `incoming`, edges from other files into the deleted entities go too.
    pub async fn delete_file_subtree(&self, repo: &str, path: &str, incoming: bool) -> Result<(), KnowledgeError> {
        let binds = || vec![("repo", Value::from(repo)), ("path", Value::from(path))];

        let mut doomed: Vec<String> = Vec::new();
        if incoming {
            for table in FILE_SCOPED_TABLES {
                let keys: Vec<String> = self
                    .fetch(
                        &format!(
                            "SELECT VALUE key FROM {} WHERE repo = $repo AND file_path = $path AND logical != true",
                            table
                        ),
                        binds(),
                    )
                    .await?;
                doomed.extend(keys);
            }
            doomed.extend(
                self.fetch::<String>("SELECT VALUE key FROM file WHERE repo = $repo AND path = $path", binds())
                    .await?,
            );
        }

        for table in FILE_SCOPED_TABLES {
            self.execute(
                &format!(
                    "DELETE {} WHERE repo = $repo AND file_path = $path AND logical != true",
                    table
                ),
                binds(),
            )
            .await?;
        }
        self.execute(
            "DELETE chunk_vector WHERE repo = $repo AND file_path = $path",
            binds(),
        )
        .await?;
        self.execute("DELETE edge WHERE repo = $repo AND origin = $path", binds())
            .await?;

        if incoming {
            self.execute("DELETE file WHERE repo = $repo AND path = $path", binds())
                .await?;
            self.execute(
                "DELETE edge WHERE repo = $repo AND (dst INSIDE $keys OR src INSIDE $keys)",
                vec![("repo", Value::from(repo)), ("keys", to_value(&doomed)?)],
            )
            .await?;
        }
        Ok(())
    }

    /// Delete shared protobuf classes no file contains any more, with their
    /// endpoints, data models and edges. Returns how many classes went.
    pub async fn sweep_logical_orphans(&self, repo: &str) -> Result<usize, KnowledgeError> {
        let logical: Vec<String> = self
            .fetch(
                "SELECT VALUE key FROM class WHERE repo = $repo AND logical = true",
                vec![("repo", Value::from(repo))],
            )
            .await?;
        if logical.is_empty() {
            return Ok(0);
        }
        let contained: HashSet<String> = self
            .fetch::<Option<String>>(
                "SELECT VALUE dst FROM edge WHERE repo = $repo AND kind = 'CONTAINS' AND src_kind = 'file' AND dst_kind = 'class'",
                vec![("repo", Value::from(repo))],
            )
            .await?
            .into_iter()
            .flatten()
            .collect();

        let orphans: Vec<String> = logical.into_iter().filter(|k| !contained.contains(k)).collect();
        if orphans.is_empty() {
            return Ok(0);
        }

        let keys = to_value(&orphans)?;
        let binds = || vec![("repo", Value::from(repo)), ("keys", keys.clone())];
        let endpoint_keys: Vec<String> = self
            .fetch("SELECT VALUE key FROM api_endpoint WHERE repo = $repo AND owner INSIDE $keys", binds())
            .await?;
        let model_keys: Vec<String> = self
            .fetch("SELECT VALUE key FROM data_model WHERE repo = $repo AND class_key INSIDE $keys", binds())
            .await?;

        self.execute("DELETE class WHERE repo = $repo AND key INSIDE $keys", binds()).await?;
        self.execute("DELETE api_endpoint WHERE repo = $repo AND owner INSIDE $keys", binds()).await?;
        self.execute("DELETE data_model WHERE repo = $repo AND class_key INSIDE $keys", binds()).await?;

        let mut all: Vec<String> = orphans.clone();
        all.extend(endpoint_keys);
        all.extend(model_keys);
        self.execute(
            "DELETE edge WHERE repo = $repo AND (dst INSIDE $keys OR src INSIDE $keys)",
            vec![("repo", Value::from(repo)), ("keys", to_value(&all)?)],
        )
        .await?;

        debug!(repo, removed = orphans.len(), "Removed unreferenced protobuf definitions");
        Ok(orphans.len())
    }

    // ===========================================================================
    // SERVICES
    // ===========================================================================

    pub async fn services(&self, repo: &str) -> Result<Vec<ServiceNode>, KnowledgeError> {
        self.fetch(
            "SELECT * OMIT id FROM service WHERE repo = $repo ORDER BY name",
            vec![("repo", Value::from(repo))],
        )
        .await
    }

    /// Delete every service of a repository with the edges touching them.
    /// Returns how many services went.
    pub async fn delete_services(&self, repo: &str) -> Result<usize, KnowledgeError> {
        let binds = || vec![("repo", Value::from(repo))];
        let count = self
            .count("SELECT count() FROM service WHERE repo = $repo GROUP ALL", binds())
            .await?;
        self.execute(
            "DELETE edge WHERE repo = $repo AND (src_kind = 'service' OR dst_kind = 'service')",
            binds(),
        )
        .await?;
        self.execute("DELETE service WHERE repo = $repo", binds()).await?;
        Ok(count)
    }

    /// Delete a repository and everything under it.
    pub async fn clear_repository(&self, repo: &str) -> Result<(), KnowledgeError> {
        for kind in NodeKind::ALL {
            if kind == NodeKind::Repository {
                continue;
            }
            self.execute(
                &format!("DELETE {} WHERE repo = $repo", kind.table()),
                vec![("repo", Value::from(repo))],
            )
            .await?;
        }
        for table in [EDGE_TABLE, VECTOR_TABLE, "job"] {
            self.execute(
                &format!("DELETE {} WHERE repo = $repo", table),
                vec![("repo", Value::from(repo))],
            )
            .await?;
        }
        self.execute(
            "DELETE type::thing('repository', $id)",
            vec![("id", Value::from(record_id(repo)))],
        )
        .await?;
        info!(repo, "Cleared repository");
        Ok(())
    }

    // ===========================================================================
    // VECTOR INDEX
    // ===========================================================================

    /// Dimension the vector index was created with, if it exists.
    pub async fn vector_index_dimensions(&self) -> Result<Option<usize>, KnowledgeError> {
        if let Some(dims) = *self.index_dimensions.read().await {
            return Ok(Some(dims));
        }
        let meta: Option<VectorIndexMeta> = self.get_record(META_TABLE, VECTOR_INDEX_META).await?;
        let dims = meta.map(|m| m.dimensions);
        *self.index_dimensions.write().await = dims;
        Ok(dims)
    }

    /// Create the vector index once; fail when it exists with another dimension.
    pub async fn ensure_vector_index(&self, dimensions: usize) -> Result<(), KnowledgeError> {
        match self.vector_index_dimensions().await? {
            Some(existing) if existing == dimensions => Ok(()),
            Some(existing) => Err(KnowledgeError::Configuration(format!(
                "vector index has {} dimensions but EMBEDDING_DIMENSIONS is {}; rebuild the index first",
                existing, dimensions
            ))),
            None => self.create_vector_index(dimensions).await,
        }
    }

    async fn create_vector_index(&self, dimensions: usize) -> Result<(), KnowledgeError> {
        self.execute(
            &format!(
                "DEFINE INDEX IF NOT EXISTS chunk_vector_embedding ON chunk_vector FIELDS embedding HNSW DIMENSION {} DIST COSINE",
                dimensions
            ),
            Vec::new(),
        )
        .await?;
        let meta = VectorIndexMeta {
            dimensions,
            created_at: chrono::Utc::now(),
        };
        self.upsert_record(META_TABLE, VECTOR_INDEX_META, &meta).await?;
        *self.index_dimensions.write().await = Some(dimensions);
        info!(dimensions, "Created vector index");
        Ok(())
    }

    /// Drop the index and every vector, recreate it, and mark all chunks pending.
    pub async fn rebuild_vector_index(&self, dimensions: usize) -> Result<(), KnowledgeError> {
        self.execute("REMOVE INDEX IF EXISTS chunk_vector_embedding ON chunk_vector", Vec::new())
            .await?;
        self.execute("DELETE chunk_vector", Vec::new()).await?;
        self.execute(
            "UPDATE chunk SET embedding_status = 'pending', model = NONE, dimensions = NONE RETURN NONE",
            Vec::new(),
        )
        .await?;
        self.execute(
            "UPDATE repository SET last_indexed_commit = NONE RETURN NONE",
            Vec::new(),
        )
        .await?;
        *self.index_dimensions.write().await = None;
        self.create_vector_index(dimensions).await
    }

    /// Write a chunk's vector. Rejected before the write when its length
    /// differs from the index dimension.
    pub async fn upsert_vector(&self, vector: &ChunkVector) -> Result<(), KnowledgeError> {
        let Some(dims) = self.vector_index_dimensions().await? else {
            return Err(KnowledgeError::Configuration(
                "vector index does not exist".into(),
            ));
        };
        if vector.embedding.len() != dims {
            return Err(KnowledgeError::Configuration(format!(
                "vector for {} has {} dimensions, index expects {}",
                vector.chunk,
                vector.embedding.len(),
                dims
            )));
        }
        self.upsert_record(VECTOR_TABLE, &vector.chunk, vector).await
    }

    pub async fn set_embedding_status(
        &self,
        chunk_key: &str,
        status: EmbeddingStatus,
        model: Option<&str>,
        dimensions: Option<usize>,
    ) -> Result<(), KnowledgeError> {
        self.merge_record(
            NodeKind::CodeChunk.table(),
            chunk_key,
            serde_json::json!({
                "embedding_status": status,
                "model": model,
                "dimensions": dimensions,
            }),
        )
        .await
    }

    /// Drop a repository's vectors and mark its chunks pending.
    pub async fn clear_embeddings(&self, repo: &str) -> Result<(), KnowledgeError> {
        self.execute("DELETE chunk_vector WHERE repo = $repo", vec![("repo", Value::from(repo))])
            .await?;
        self.execute(
            "UPDATE chunk SET embedding_status = 'pending', model = NONE, dimensions = NONE WHERE repo = $repo RETURN NONE",
            vec![("repo", Value::from(repo))],
        )
        .await?;
        Ok(())
    }

    /// Rank a repository's chunks by cosine similarity to `embedding`.
    pub async fn search(
        &self,
        repo: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>, KnowledgeError> {
        if let Some(dims) = self.vector_index_dimensions().await? {
            if embedding.len() != dims {
                return Err(KnowledgeError::Configuration(format!(
                    "query vector has {} dimensions, index expects {}",
                    embedding.len(),
                    dims
                )));
            }
        }

        // LIMIT must be a literal, format it directly
        let query = format!(
            r#"
            SELECT chunk, vector::similarity::cosine(embedding, $embedding) AS score
            FROM chunk_vector
            WHERE repo = $repo
            ORDER BY score DESC
            LIMIT {}
            "#,
            limit.max(1)
        );
        let hits: Vec<VectorHit> = self
            .fetch(
                &query,
                vec![("repo", Value::from(repo)), ("embedding", to_value(&embedding)?)],
            )
            .await?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<&str> = hits.iter().map(|h| h.chunk.as_str()).collect();
        let chunks: Vec<CodeChunk> = self
            .fetch(
                "SELECT * OMIT id FROM chunk WHERE repo = $repo AND key INSIDE $keys",
                vec![("repo", Value::from(repo)), ("keys", to_value(&keys)?)],
            )
            .await?;
        let by_key: HashMap<&str, &CodeChunk> = chunks.iter().map(|c| (c.key.as_str(), c)).collect();

        Ok(hits
            .iter()
            .filter_map(|hit| {
                by_key.get(hit.chunk.as_str()).map(|chunk| SearchResult {
                    chunk: chunk.key.clone(),
                    path: chunk.file_path.clone(),
                    score: hit.score,
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    preview: chunk.content.chars().take(SEARCH_PREVIEW_CHARS).collect(),
                    owner: chunk.owner.clone(),
                })
            })
            .collect())
    }

    // ===========================================================================
    // STATISTICS
    // ===========================================================================

    /// Node, edge and vector counts for one repository or the whole store.
    pub async fn stats(&self, repo: Option<&str>) -> Result<IndexStats, KnowledgeError> {
        let (filter, binds): (&str, Vec<(&'static str, Value)>) = match repo {
            Some(r) => (" WHERE repo = $repo", vec![("repo", Value::from(r))]),
            None => ("", Vec::new()),
        };

        let mut stats = IndexStats::default();
        for kind in NodeKind::ALL {
            let count = match (kind, repo) {
                (NodeKind::Repository, Some(r)) => self
                    .count(
                        "SELECT count() FROM repository WHERE key = $repo GROUP ALL",
                        vec![("repo", Value::from(r))],
                    )
                    .await?,
                _ => self
                    .count(
                        &format!("SELECT count() FROM {}{} GROUP ALL", kind.table(), filter),
                        binds.clone(),
                    )
                    .await?,
            };
            stats.nodes.insert(kind.label().to_string(), count);
        }

        stats.edges = self
            .count(&format!("SELECT count() FROM edge{} GROUP ALL", filter), binds.clone())
            .await?;
        stats.vectors = self
            .count(&format!("SELECT count() FROM chunk_vector{} GROUP ALL", filter), binds.clone())
            .await?;

        let status_filter = |status: &str| match repo {
            Some(_) => format!(
                "SELECT count() FROM chunk WHERE repo = $repo AND embedding_status = '{}' GROUP ALL",
                status
            ),
            None => format!(
                "SELECT count() FROM chunk WHERE embedding_status = '{}' GROUP ALL",
                status
            ),
        };
        stats.pending_embeddings = self.count(&status_filter("pending"), binds.clone()).await?;
        stats.failed_embeddings = self.count(&status_filter("failed"), binds).await?;

        Ok(stats)
    }
}

fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, KnowledgeError> {
    serde_json::to_value(value).map_err(|e| KnowledgeError::GraphWrite {
        message: format!("failed to encode record: {}", e),
        transient: false,
    })
}
