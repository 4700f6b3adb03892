//! The ingestion orchestrator.
//!
//! One run moves a repository through acquisition, parsing, chunking,
//! embedding, loading and repair. Work is incremental at file granularity:
//! files whose content hash is unchanged are not reprocessed, and a failed
//! run leaves the files it already loaded in place. The repository's last
//! indexed commit only moves when a run completes.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use super::acquire::RepositorySource;
use super::job::{IngestRequest, JobRecord, JobStatus};
use super::stage::Stage;
use super::walker::{discover, read_lossy, SourceFile};
use crate::config::IngestionConfig;
use crate::knowledge::identity::{chunk_key, content_hash, normalize_path, normalize_url};
use crate::knowledge::loader::{FileLoad, GraphLoader, LoadReport, ServiceReport, VectorUpdate};
use crate::knowledge::parser::{FileStructure, ParserRegistry};
use crate::knowledge::resolve::ImportResolver;
use crate::knowledge::services::detect_services;
use crate::knowledge::{
    Chunker, EmbeddingGenerator, GraphDb, KnowledgeError, OntologyRepair, RepairReport,
    RepositoryNode, RepositoryRef, RepositoryStatus, VerificationReport,
};

const JOB_TABLE: &str = "job";

/// Part of a repository removed by [`Ingestor::clear`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearScope {
    /// The repository node and everything under it.
    All,
    /// Vectors only; chunks go back to pending.
    Embeddings,
    /// The subtrees of these files.
    Paths(Vec<String>),
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub status: JobStatus,
    pub repository: String,
    pub commit: Option<String>,
    pub files_discovered: usize,
    /// Files parsed, chunked and loaded by this run.
    pub files_changed: usize,
    /// Files skipped because their content hash was unchanged.
    pub files_unchanged: usize,
    pub files_pruned: usize,
    /// Files skipped because they could not be read, with the reason.
    pub unreadable: Vec<(String, String)>,
    pub parse_errors: usize,
    pub failed_batches: usize,
    pub load: Option<LoadReport>,
    /// Set when the repository has service detection enabled.
    pub services: Option<ServiceReport>,
    pub repair: Option<RepairReport>,
    pub verification: Option<VerificationReport>,
}

impl IngestOutcome {
    fn for_job(job: &JobRecord) -> Self {
        Self {
            status: job.to_status(),
            repository: job.repo.clone(),
            commit: job.commit.clone(),
            files_discovered: 0,
            files_changed: 0,
            files_unchanged: 0,
            files_pruned: 0,
            unreadable: Vec::new(),
            parse_errors: 0,
            failed_batches: 0,
            load: None,
            services: None,
            repair: None,
            verification: None,
        }
    }
}

struct ActiveRun {
    job_id: String,
    cancel: Arc<AtomicBool>,
}

type ActiveRuns = Arc<Mutex<HashMap<String, ActiveRun>>>;

/// Removes a repository from the active set when its run ends.
struct RunGuard {
    active: ActiveRuns,
    repo: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.repo);
        }
    }
}

/// A claimed run that has not started working yet.
struct PreparedRun {
    job: JobRecord,
    repo: RepositoryRef,
    request: IngestRequest,
    cancel: Arc<AtomicBool>,
    _guard: RunGuard,
}

/// A file after the parsing stage.
enum Parsed {
    Unchanged,
    /// The file could not be read; the graph keeps whatever it had for it.
    Unreadable { path: String, error: String },
    Changed {
        structure: FileStructure,
        content: String,
        hash: String,
        size: u64,
    },
}

/// Runs ingestion jobs against one graph store.
pub struct Ingestor {
    config: IngestionConfig,
    db: Arc<GraphDb>,
    generator: Arc<EmbeddingGenerator>,
    source: Arc<dyn RepositorySource>,
    registry: Arc<ParserRegistry>,
    active: ActiveRuns,
}

impl Ingestor {
    pub fn new(
        config: IngestionConfig,
        db: Arc<GraphDb>,
        generator: Arc<EmbeddingGenerator>,
        source: Arc<dyn RepositorySource>,
    ) -> Self {
        Self {
            config,
            db,
            generator,
            source,
            registry: Arc::new(ParserRegistry::new()),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn db(&self) -> &Arc<GraphDb> {
        &self.db
    }

    fn loader(&self) -> GraphLoader {
        GraphLoader::new(
            Arc::clone(&self.db),
            self.generator.model_name(),
            self.generator.dimensions(),
        )
    }

    // ===========================================================================
    // TRIGGER AND STATUS
    // ===========================================================================

    /// Run an ingestion to completion.
    pub async fn run(&self, request: IngestRequest) -> Result<IngestOutcome, KnowledgeError> {
        let prepared = self.prepare(request).await?;
        self.execute(prepared).await
    }

    /// Start an ingestion in the background and return its job id.
    ///
    /// Branch resolution and the concurrent-run check happen before this
    /// returns; everything else is reported through [`Ingestor::status`].
    pub async fn submit(self: &Arc<Self>, request: IngestRequest) -> Result<String, KnowledgeError> {
        let prepared = self.prepare(request).await?;
        let job_id = prepared.job.id.clone();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.execute(prepared).await {
                debug!(error = %e, "Background ingestion ended with an error");
            }
        });
        Ok(job_id)
    }

    /// Status of a job, live or finished.
    pub async fn status(&self, job_id: &str) -> Result<JobStatus, KnowledgeError> {
        self.db
            .get_record::<JobRecord>(JOB_TABLE, job_id)
            .await?
            .map(|job| job.to_status())
            .ok_or_else(|| KnowledgeError::EntityNotFound(format!("job {}", job_id)))
    }

    /// Most recent job for a repository.
    pub async fn latest_job(&self, repo: &str) -> Result<Option<JobRecord>, KnowledgeError> {
        let jobs: Vec<JobRecord> = self.db.list_records(JOB_TABLE, repo).await?;
        Ok(jobs.into_iter().max_by_key(|j| j.created_at))
    }

    /// Ask a running job to stop after its current unit of work.
    ///
    /// Returns false when no run with this id is active in this process.
    pub fn cancel(&self, job_id: &str) -> bool {
        let found = match self.active.lock() {
            Ok(active) => active
                .values()
                .find(|run| run.job_id == job_id)
                .map(|run| run.cancel.store(true, Ordering::SeqCst))
                .is_some(),
            Err(_) => false,
        };
        if found {
            info!(job = job_id, "Cancellation requested");
        }
        found
    }

    /// Identify a repository from its URL and optional branch.
    ///
    /// Without a branch, a single stored repository with this URL is used;
    /// otherwise the source's default branch.
    pub async fn resolve_ref(&self, url: &str, branch: Option<&str>) -> Result<RepositoryRef, KnowledgeError> {
        if let Some(branch) = branch.filter(|b| !b.trim().is_empty()) {
            return Ok(RepositoryRef::new(url, branch));
        }
        let normalized = normalize_url(url);
        let known: Vec<RepositoryNode> = self
            .db
            .list_repositories()
            .await?
            .into_iter()
            .filter(|r| r.url == normalized)
            .collect();
        if let [only] = known.as_slice() {
            return Ok(RepositoryRef::new(&only.url, &only.branch));
        }
        let branch = self.source.default_branch(&normalized).await?;
        Ok(RepositoryRef::new(&normalized, &branch))
    }

    // ===========================================================================
    // MAINTENANCE
    // ===========================================================================

    /// Remove part of a repository from the graph.
    ///
    /// Every scope resets the last indexed commit so the next run does the
    /// work again.
    pub async fn clear(&self, repo: &str, scope: ClearScope) -> Result<(), KnowledgeError> {
        if self.is_active(repo) {
            return Err(KnowledgeError::AlreadyInProgress {
                repository: repo.to_string(),
            });
        }
        let Some(mut repository) = self.db.get_repository(repo).await? else {
            return Err(KnowledgeError::EntityNotFound(format!("repository {}", repo)));
        };

        match scope {
            ClearScope::All => {
                self.db.clear_repository(repo).await?;
                return Ok(());
            }
            ClearScope::Embeddings => {
                self.db.clear_embeddings(repo).await?;
                info!(repo, "Cleared embeddings");
            }
            ClearScope::Paths(paths) => {
                let paths: Vec<String> = paths.iter().map(|p| normalize_path(p)).collect();
                let loader = self.loader();
                loader.prune_files(repo, &paths).await?;
                loader.link_inheritance(repo).await?;
                info!(repo, files = paths.len(), "Cleared files");
            }
        }

        repository.last_indexed_commit = None;
        repository.updated_at = Utc::now();
        self.db.upsert_repository(&repository).await
    }

    /// Drop every vector and recreate the index with the configured dimension.
    pub async fn rebuild_index(&self) -> Result<(), KnowledgeError> {
        let busy = self.active.lock().map(|a| !a.is_empty()).unwrap_or(true);
        if busy {
            return Err(KnowledgeError::AlreadyInProgress {
                repository: "vector index".to_string(),
            });
        }
        self.generator.check_dimensions()?;
        self.db.rebuild_vector_index(self.generator.dimensions()).await
    }

    fn is_active(&self, repo: &str) -> bool {
        self.active.lock().map(|a| a.contains_key(repo)).unwrap_or(true)
    }

    // ===========================================================================
    // RUN LIFECYCLE
    // ===========================================================================

    async fn prepare(&self, request: IngestRequest) -> Result<PreparedRun, KnowledgeError> {
        let url = normalize_url(&request.repository_url);
        if url.is_empty() {
            return Err(KnowledgeError::Configuration("repository URL is empty".into()));
        }
        let branch = match request.branch.as_deref().map(str::trim) {
            Some(b) if !b.is_empty() => b.to_string(),
            _ => self.source.default_branch(&url).await?,
        };
        let repo = RepositoryRef::new(&url, &branch);
        let key = repo.key();

        let job = JobRecord::new(&key, &repo.url, &repo.branch, request.force_reindex);
        let cancel = Arc::new(AtomicBool::new(false));
        let guard = self.claim(&key, &job.id, Arc::clone(&cancel))?;
        self.check_durable_claim(&key).await?;
        self.save(&job).await?;

        info!(repo = %key, job = %job.id, force = request.force_reindex, "Ingestion requested");
        Ok(PreparedRun {
            job,
            repo,
            request,
            cancel,
            _guard: guard,
        })
    }

    fn claim(&self, repo: &str, job_id: &str, cancel: Arc<AtomicBool>) -> Result<RunGuard, KnowledgeError> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| KnowledgeError::Configuration("active run registry is poisoned".into()))?;
        if active.contains_key(repo) {
            return Err(KnowledgeError::AlreadyInProgress {
                repository: repo.to_string(),
            });
        }
        active.insert(
            repo.to_string(),
            ActiveRun {
                job_id: job_id.to_string(),
                cancel,
            },
        );
        Ok(RunGuard {
            active: Arc::clone(&self.active),
            repo: repo.to_string(),
        })
    }

    /// Reject a run while another process works on the repository.
    async fn check_durable_claim(&self, repo: &str) -> Result<(), KnowledgeError> {
        let Some(existing) = self.db.get_repository(repo).await? else {
            return Ok(());
        };
        if existing.status != RepositoryStatus::Processing {
            return Ok(());
        }
        let Some(job_id) = existing.job_id.as_deref() else {
            return Ok(());
        };
        match self.db.get_record::<JobRecord>(JOB_TABLE, job_id).await? {
            Some(job) if !job.is_stale(self.config.stale_job_secs) && !job.is_finished() => {
                Err(KnowledgeError::AlreadyInProgress {
                    repository: repo.to_string(),
                })
            }
            _ => {
                warn!(repo, job = job_id, "Taking over abandoned ingestion");
                Ok(())
            }
        }
    }

    async fn execute(&self, run: PreparedRun) -> Result<IngestOutcome, KnowledgeError> {
        let PreparedRun {
            mut job,
            repo,
            request,
            cancel,
            _guard,
        } = run;

        let result = self.drive(&mut job, &repo, &request, &cancel).await;
        if let Err(e) = &result {
            self.record_failure(&mut job, &repo, e).await;
        }
        result
    }

    async fn drive(
        &self,
        job: &mut JobRecord,
        repo: &RepositoryRef,
        request: &IngestRequest,
        cancel: &AtomicBool,
    ) -> Result<IngestOutcome, KnowledgeError> {
        let key = repo.key();
        let is_cancelled = || cancel.load(Ordering::SeqCst);

        // Skip check before any graph write.
        let existing = self.db.get_repository(&key).await?;
        let head = self.source.remote_head(&repo.url, &repo.branch).await?;
        let up_to_date = existing.as_ref().map_or(false, |r| {
            r.status == RepositoryStatus::Completed && r.last_indexed_commit.as_deref() == Some(head.as_str())
        });
        let enables_services = request.detect_services && !existing.as_ref().is_some_and(|r| r.detect_services);
        if up_to_date && !request.force_reindex && !enables_services {
            job.commit = Some(head);
            job.skip();
            self.save(job).await?;
            info!(repo = %key, commit = ?job.commit, "Commit already indexed, skipping");
            return Ok(IngestOutcome::for_job(job));
        }

        self.generator.check_dimensions()?;
        let loader = self.loader();
        loader.check_vector_index().await?;

        let mut repository = existing.unwrap_or_else(|| RepositoryNode {
            key: key.clone(),
            url: repo.url.clone(),
            branch: repo.branch.clone(),
            name: repo.display_name(),
            description: None,
            last_indexed_commit: None,
            last_indexed_at: None,
            status: RepositoryStatus::Pending,
            error: None,
            job_id: None,
            detect_services: false,
            updated_at: Utc::now(),
        });
        if request.description.is_some() {
            repository.description = request.description.clone();
        }
        repository.detect_services |= request.detect_services;
        repository.status = RepositoryStatus::Processing;
        repository.error = None;
        repository.job_id = Some(job.id.clone());
        repository.updated_at = Utc::now();
        self.db.upsert_repository(&repository).await?;

        // ACQUIRING
        self.advance(job, Stage::Acquiring).await?;
        let checkout = self.source.acquire(repo).await?;
        job.commit = Some(checkout.commit.clone());
        job.set_message(format!("checked out {}", short_commit(&checkout.commit)));

        // PARSING
        self.advance(job, Stage::Parsing).await?;
        let root = checkout.path.clone();
        let config = self.config.clone();
        let files = tokio::task::spawn_blocking(move || discover(&root, &config))
            .await
            .map_err(|e| KnowledgeError::Configuration(format!("file discovery task failed: {}", e)))??;
        let previous = self.db.file_hashes(&key).await?;
        let parsed = self
            .parse_files(job, &files, &previous, request.force_reindex, &is_cancelled)
            .await?;

        let mut outcome = IngestOutcome::for_job(job);
        outcome.files_discovered = files.len();

        // CHUNKING
        self.advance(job, Stage::Chunking).await?;
        let chunker = Chunker::new(self.config.chunk_size);
        let mut loads = Vec::new();
        let total = parsed.len();
        for (done, item) in parsed.into_iter().enumerate() {
            if is_cancelled() {
                return Err(KnowledgeError::Cancelled);
            }
            match item {
                Parsed::Unchanged => outcome.files_unchanged += 1,
                Parsed::Unreadable { path, error } => outcome.unreadable.push((path, error)),
                Parsed::Changed {
                    structure,
                    content,
                    hash,
                    size,
                } => {
                    outcome.parse_errors += structure.parse_errors.len();
                    let chunks = chunker.chunk_file(&structure, &content);
                    loads.push(FileLoad {
                        structure,
                        size,
                        content_hash: hash,
                        chunks,
                        vectors: Vec::new(),
                    });
                }
            }
            self.progress(job, done + 1, total).await?;
        }
        outcome.files_changed = loads.len();

        // EMBEDDING
        self.advance(job, Stage::Embedding).await?;
        let changed: HashSet<&str> = loads.iter().map(|l| l.structure.path.as_str()).collect();
        let present: HashSet<&str> = files.iter().map(|f| f.path.as_str()).collect();
        let pending: Vec<_> = self
            .db
            .chunks_needing_vectors(&key)
            .await?
            .into_iter()
            .filter(|c| present.contains(c.file_path.as_str()) && !changed.contains(c.file_path.as_str()))
            .collect();

        let mut texts: Vec<String> = loads
            .iter()
            .flat_map(|l| l.chunks.iter().map(|c| c.content.clone()))
            .collect();
        let fresh = texts.len();
        texts.extend(pending.iter().map(|c| c.content.clone()));
        job.set_message(format!("embedding {} chunks", texts.len()));
        self.save(job).await?;

        let run = self.generator.embed_batches(&texts, &is_cancelled).await?;
        outcome.failed_batches = run.failed_batches;
        if run.failed_batches > 0 {
            warn!(
                repo = %key,
                failed = run.failed_batches,
                total = run.total_batches,
                "Some embedding batches failed"
            );
        }
        let mut vectors = run.vectors.into_iter();
        for load in &mut loads {
            load.vectors = vectors.by_ref().take(load.chunks.len()).collect();
        }
        let refreshed: Vec<VectorUpdate> = pending
            .iter()
            .zip(vectors.by_ref())
            .map(|(chunk, embedding)| VectorUpdate {
                chunk: chunk_key(&key, &chunk.file_path, &chunk.owner, chunk.index),
                file_path: chunk.file_path.clone(),
                embedding,
            })
            .collect();
        debug!(repo = %key, fresh, refreshed = refreshed.len(), "Embedding done");

        // LOADING
        self.advance(job, Stage::Loading).await?;
        let resolver = ImportResolver::new(files.iter().map(|f| f.path.as_str()));
        let report = loader
            .load(&repository, &loads, &refreshed, &resolver, &is_cancelled)
            .await?;

        let removed: Vec<String> = previous
            .keys()
            .filter(|p| !present.contains(p.as_str()))
            .cloned()
            .collect();
        if !removed.is_empty() {
            outcome.files_pruned = loader.prune_files(&key, &removed).await?;
            loader.link_inheritance(&key).await?;
            info!(repo = %key, files = removed.len(), "Pruned files no longer in the tree");
        }
        outcome.load = Some(report);

        if repository.detect_services {
            let root = checkout.path.clone();
            let paths: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
            let repo_key = key.clone();
            let detected = tokio::task::spawn_blocking(move || detect_services(&repo_key, &root, &paths))
                .await
                .map_err(|e| KnowledgeError::Configuration(format!("service detection task failed: {}", e)))?;
            outcome.services = Some(loader.load_services(&key, &detected).await?);
        }

        // REPAIRING
        self.advance(job, Stage::Repairing).await?;
        let repair = OntologyRepair::new(Arc::clone(&self.db));
        let repaired = repair.repair(&key).await?;
        let verification = repair.verify(&key).await?;
        if !verification.is_healthy() {
            warn!(
                repo = %key,
                orphans = verification.orphan_count,
                fallback_edges = verification.fallback_edge_count,
                "Graph still has defects after repair"
            );
        }
        outcome.repair = Some(repaired);
        outcome.verification = Some(verification);

        // COMPLETED
        repository.status = RepositoryStatus::Completed;
        repository.last_indexed_commit = job.commit.clone();
        repository.last_indexed_at = Some(Utc::now());
        repository.error = None;
        repository.updated_at = Utc::now();
        self.db.upsert_repository(&repository).await?;

        let mut message = format!(
            "{} changed, {} unchanged, {} pruned, {} unreadable",
            outcome.files_changed,
            outcome.files_unchanged,
            outcome.files_pruned,
            outcome.unreadable.len()
        );
        if let Some(services) = &outcome.services {
            message.push_str(&format!(", {} services", services.services));
        }
        job.set_message(message);
        self.advance(job, Stage::Completed).await?;

        outcome.status = job.to_status();
        outcome.commit = job.commit.clone();
        info!(
            repo = %key,
            commit = ?job.commit,
            changed = outcome.files_changed,
            unchanged = outcome.files_unchanged,
            "Ingestion completed"
        );
        Ok(outcome)
    }

    /// Parse changed files on the blocking pool, `parse_workers` at a time.
    async fn parse_files(
        &self,
        job: &mut JobRecord,
        files: &[SourceFile],
        previous: &HashMap<String, String>,
        force: bool,
        is_cancelled: &(dyn Fn() -> bool + Sync),
    ) -> Result<Vec<Parsed>, KnowledgeError> {
        let workers = self.config.effective_parse_workers();
        let total = files.len();

        let tasks: Vec<BoxFuture<'_, (usize, Result<Parsed, KnowledgeError>)>> = files
            .iter()
            .enumerate()
            .map(|(idx, file)| {
                let registry = Arc::clone(&self.registry);
                let absolute = file.absolute.clone();
                let path = file.path.clone();
                let size = file.size;
                let known = previous.get(&file.path).cloned();
                async move {
                    if is_cancelled() {
                        return (idx, Err(KnowledgeError::Cancelled));
                    }
                    let task = tokio::task::spawn_blocking(move || parse_one(&registry, &absolute, path, size, known, force));
                    let result = task.await.unwrap_or_else(|e| {
                        Err(KnowledgeError::Configuration(format!("parse task failed: {}", e)))
                    });
                    (idx, result)
                }
                .boxed()
            })
            .collect();
        let mut results = stream::iter(tasks).buffer_unordered(workers);

        let mut parsed: Vec<Option<Parsed>> = (0..total).map(|_| None).collect();
        let mut done = 0;
        while let Some((idx, result)) = results.next().await {
            let item = result?;
            match &item {
                Parsed::Changed { structure, .. } => {
                    for issue in &structure.parse_errors {
                        warn!(path = %structure.path, error = %issue, "Parse error");
                    }
                }
                Parsed::Unreadable { path, error } => warn!(path = %path, error = %error, "Skipping unreadable file"),
                Parsed::Unchanged => {}
            }
            parsed[idx] = Some(item);
            done += 1;
            self.progress(job, done, total).await?;
        }
        Ok(parsed.into_iter().flatten().collect())
    }

    async fn advance(&self, job: &mut JobRecord, stage: Stage) -> Result<(), KnowledgeError> {
        if !job.enter(stage) {
            return Err(KnowledgeError::Configuration(format!(
                "invalid stage transition {} -> {}",
                job.stage, stage
            )));
        }
        info!(repo = %job.repo, job = %job.id, stage = %stage, "Stage started");
        self.save(job).await
    }

    async fn progress(&self, job: &mut JobRecord, done: usize, total: usize) -> Result<(), KnowledgeError> {
        if job.set_progress(done, total) {
            self.save(job).await?;
        }
        Ok(())
    }

    async fn save(&self, job: &JobRecord) -> Result<(), KnowledgeError> {
        self.db.upsert_record(JOB_TABLE, &job.id, job).await
    }

    /// Mark the job failed, and the repository too when it is already
    /// stored. Errors here are only logged so the original error reaches
    /// the caller.
    async fn record_failure(
        &self,
        job: &mut JobRecord,
        repo: &RepositoryRef,
        err: &KnowledgeError,
    ) {
        let stage = job.stage;
        if matches!(err, KnowledgeError::Cancelled) {
            job.cancel_requested = true;
        }
        job.fail(err.to_string());
        match err {
            KnowledgeError::Cancelled => warn!(repo = %repo, stage = %stage, "Ingestion cancelled"),
            _ => error!(repo = %repo, stage = %stage, error = %err, "Ingestion failed"),
        }

        let key = repo.key();
        let repository = match self.db.get_repository(&key).await {
            Ok(Some(mut existing)) => {
                existing.status = RepositoryStatus::Failed;
                existing.error = Some(err.to_string());
                existing.job_id = Some(job.id.clone());
                existing.updated_at = Utc::now();
                Some(existing)
            }
            Ok(None) => {
                debug!(repo = %key, "Repository was never stored, failure recorded on the job only");
                None
            }
            Err(e) => {
                warn!(repo = %key, error = %e, "Failed to read repository while recording failure");
                None
            }
        };
        if let Some(repository) = repository {
            if let Err(e) = self.db.upsert_repository(&repository).await {
                warn!(repo = %key, error = %e, "Failed to record repository failure");
            }
        }

        // Job state is written last; pollers treat a terminal job as settled.
        if let Err(e) = self.save(job).await {
            warn!(job = %job.id, error = %e, "Failed to record job failure");
        }
    }
}

/// Read, hash and parse one file. Runs on the blocking pool.
fn parse_one(
    registry: &ParserRegistry,
    absolute: &Path,
    path: String,
    size: u64,
    known: Option<String>,
    force: bool,
) -> Result<Parsed, KnowledgeError> {
    let content = match read_lossy(absolute) {
        Ok(content) => content,
        Err(e) => {
            return Ok(Parsed::Unreadable {
                path,
                error: e.to_string(),
            })
        }
    };
    let hash = content_hash(&content);
    if !force && known.as_deref() == Some(hash.as_str()) {
        return Ok(Parsed::Unchanged);
    }
    let structure = registry.parse(&path, &content);
    Ok(Parsed::Changed {
        structure,
        content,
        hash,
        size,
    })
}

fn short_commit(commit: &str) -> &str {
    commit.get(..12).unwrap_or(commit)
}
