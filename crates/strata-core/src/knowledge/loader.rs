//! Writes parsed files into the knowledge graph.
//!
//! Writes follow the containment hierarchy: the Repository, then each
//! File, its Functions and Classes, the endpoints and data models they
//! declare, the file's CodeChunks under their most specific owner, and the
//! file's imports. Inheritance is linked across the whole repository once
//! every file is in place, and vectors go into the index last.
//!
//! A File's content hash is recorded after its vectors, so a file whose load
//! was interrupted is picked up again by the next run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use super::chunker::Chunk;
use super::db::GraphDb;
use super::error::KnowledgeError;
use super::identity::{
    chunk_key, class_key, data_model_key, endpoint_key, file_key, function_key, proto_class_key,
};
use super::models::{
    ApiEndpointNode, ChunkVector, ClassNode, CodeChunk, DataModelNode, EmbeddingStatus, FileNode,
    FunctionNode, RepositoryNode,
};
use super::ontology::{EdgeKind, EdgeRecord, NodeKind};
use super::parser::{language_label, extension_of, FileStructure, Language, ParsedClass, FILE_OWNER};
use super::resolve::{ImportResolver, InheritanceResolver};
use super::services::DetectedServices;

/// One parsed file ready to be written.
#[derive(Debug, Clone)]
pub struct FileLoad {
    pub structure: FileStructure,
    pub size: u64,
    pub content_hash: String,
    pub chunks: Vec<Chunk>,
    /// One entry per chunk; `None` where embedding failed.
    pub vectors: Vec<Option<Vec<f32>>>,
}

/// A vector for a chunk that is already in the graph.
#[derive(Debug, Clone)]
pub struct VectorUpdate {
    pub chunk: String,
    pub file_path: String,
    pub embedding: Option<Vec<f32>>,
}

/// What a load wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub files: usize,
    pub functions: usize,
    pub classes: usize,
    pub endpoints: usize,
    pub data_models: usize,
    pub chunks: usize,
    pub vectors: usize,
    pub failed_embeddings: usize,
    pub imports: usize,
    pub unresolved_imports: usize,
    pub inheritance_edges: usize,
    /// Chunks attached straight to the Repository.
    pub fallback_edges: usize,
}

/// What a service load wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceReport {
    pub services: usize,
    /// Service -> File membership edges.
    pub files: usize,
    pub dependencies: usize,
    /// Declared dependencies naming no detected service.
    pub unresolved_dependencies: usize,
    /// Services removed before the rewrite.
    pub replaced: usize,
}

/// A node that can own chunks, with the lines it spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySpan {
    /// Owner name used by chunks (`fn:..`, `class:..`).
    pub owner: String,
    pub key: String,
    pub kind: NodeKind,
    pub start_line: u32,
    pub end_line: u32,
}

/// Smallest entity whose span contains `[start, end]`.
pub fn most_specific_owner(spans: &[EntitySpan], start: u32, end: u32) -> Option<&EntitySpan> {
    spans
        .iter()
        .filter(|s| s.start_line <= start && end <= s.end_line)
        .min_by_key(|s| (s.end_line - s.start_line, s.kind != NodeKind::Function))
}

/// Parent of a chunk: its named owner, else the smallest containing entity,
/// else its File, else the Repository.
pub fn chunk_parent(
    repo: &str,
    owner: Option<&EntitySpan>,
    spans: &[EntitySpan],
    file: Option<&str>,
    start: u32,
    end: u32,
) -> (String, NodeKind) {
    if let Some(owner) = owner {
        return (owner.key.clone(), owner.kind);
    }
    if let Some(span) = most_specific_owner(spans, start, end) {
        return (span.key.clone(), span.kind);
    }
    match file {
        Some(file) => (file.to_string(), NodeKind::File),
        None => (repo.to_string(), NodeKind::Repository),
    }
}

/// Key of a class declared in `structure`. Protobuf definitions are shared
/// across every copy of the same package.
fn class_key_for(repo: &str, structure: &FileStructure, class: &ParsedClass) -> (String, bool) {
    if structure.language == Language::Protobuf {
        let package = structure.package.clone().unwrap_or_else(|| file_stem(&structure.path));
        (proto_class_key(repo, &package, &class.name), true)
    } else {
        (class_key(repo, &structure.path, &class.name), false)
    }
}

fn file_stem(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.split('.').next().unwrap_or(name).to_string()
}

/// Writes parse results, chunks and vectors for one repository at a time.
pub struct GraphLoader {
    db: Arc<GraphDb>,
    model: String,
    dimensions: usize,
}

impl GraphLoader {
    pub fn new(db: Arc<GraphDb>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            db,
            model: model.into(),
            dimensions,
        }
    }

    /// Fail when an existing vector index has another dimension. Reads only.
    pub async fn check_vector_index(&self) -> Result<(), KnowledgeError> {
        match self.db.vector_index_dimensions().await? {
            Some(existing) if existing != self.dimensions => Err(KnowledgeError::Configuration(format!(
                "vector index has {} dimensions but EMBEDDING_DIMENSIONS is {}; rebuild the index first",
                existing, self.dimensions
            ))),
            _ => Ok(()),
        }
    }

    /// Load a repository's changed files and refreshed vectors.
    ///
    /// `resolver` knows every path in the working tree, including files that
    /// are not reloaded. Cancellation is honored between files.
    pub async fn load(
        &self,
        repository: &RepositoryNode,
        files: &[FileLoad],
        refreshed: &[VectorUpdate],
        resolver: &ImportResolver,
        is_cancelled: &(dyn Fn() -> bool + Sync),
    ) -> Result<LoadReport, KnowledgeError> {
        self.check_vector_index().await?;
        let repo = repository.key.as_str();
        let _guard = self.db.lock_repository(repo).await;

        self.db.upsert_repository(repository).await?;

        let mut report = LoadReport::default();
        for file in files {
            if is_cancelled() {
                return Err(KnowledgeError::Cancelled);
            }
            self.load_structure(repo, file, resolver, &mut report).await?;
        }

        report.inheritance_edges = self.link_inheritance(repo).await?;

        self.db.ensure_vector_index(self.dimensions).await?;
        for file in files {
            if is_cancelled() {
                return Err(KnowledgeError::Cancelled);
            }
            let path = &file.structure.path;
            let updates: Vec<VectorUpdate> = file
                .chunks
                .iter()
                .enumerate()
                .map(|(i, chunk)| VectorUpdate {
                    chunk: chunk_key(repo, path, &chunk.owner, chunk.index),
                    file_path: path.clone(),
                    embedding: file.vectors.get(i).cloned().flatten(),
                })
                .collect();
            self.write_vectors(repo, &updates, &mut report).await?;
            self.db
                .merge_record(
                    NodeKind::File.table(),
                    &file_key(repo, path),
                    json!({ "content_hash": file.content_hash }),
                )
                .await?;
        }
        self.write_vectors(repo, refreshed, &mut report).await?;

        info!(
            repo,
            files = report.files,
            chunks = report.chunks,
            vectors = report.vectors,
            failed_embeddings = report.failed_embeddings,
            "Loaded into graph"
        );
        Ok(report)
    }

    /// Replace one file's subtree. The File keeps an empty content hash
    /// until its vectors are written.
    async fn load_structure(
        &self,
        repo: &str,
        load: &FileLoad,
        resolver: &ImportResolver,
        report: &mut LoadReport,
    ) -> Result<(), KnowledgeError> {
        let structure = &load.structure;
        let path = structure.path.as_str();
        let file = file_key(repo, path);

        self.db.delete_file_subtree(repo, path, false).await?;

        // File
        let node = FileNode {
            key: file.clone(),
            repo: repo.to_string(),
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            extension: extension_of(path).unwrap_or_default().to_ascii_lowercase(),
            language: language_label(path),
            size: load.size,
            content_hash: String::new(),
            is_documentation: structure.is_documentation,
            is_schema: structure.is_schema,
            is_config: structure.is_config,
            parse_errors: structure.parse_errors.iter().map(|e| e.to_string()).collect(),
            package: structure.package.clone(),
        };
        self.db.upsert_node(NodeKind::File, &file, &node).await?;
        self.edge(EdgeRecord::new(repo, EdgeKind::BelongsTo, (&file, NodeKind::File), (repo, NodeKind::Repository)), path)
            .await?;
        self.edge(EdgeRecord::new(repo, EdgeKind::Contains, (repo, NodeKind::Repository), (&file, NodeKind::File)), path)
            .await?;
        report.files += 1;
        if structure.has_errors() {
            warn!(repo, path, errors = structure.parse_errors.len(), "File loaded with parse errors");
        }

        // Functions and classes
        let mut owners: HashMap<String, EntitySpan> = HashMap::new();
        for function in &structure.functions {
            let key = function_key(repo, path, &function.name, function.start_line);
            let node = FunctionNode {
                key: key.clone(),
                repo: repo.to_string(),
                file_path: path.to_string(),
                name: function.name.clone(),
                signature: function.signature.clone(),
                start_line: function.start_line,
                end_line: function.end_line,
                receiver: function.receiver.clone(),
                doc_comment: function.doc_comment.clone(),
            };
            self.db.upsert_node(NodeKind::Function, &key, &node).await?;
            self.edge(EdgeRecord::new(repo, EdgeKind::Contains, (&file, NodeKind::File), (&key, NodeKind::Function)), path)
                .await?;
            owners.insert(
                function.owner_name(),
                EntitySpan {
                    owner: function.owner_name(),
                    key,
                    kind: NodeKind::Function,
                    start_line: function.start_line,
                    end_line: function.end_line,
                },
            );
            report.functions += 1;
        }

        let mut classes: HashMap<&str, (String, bool)> = HashMap::new();
        for class in &structure.classes {
            let (key, logical) = class_key_for(repo, structure, class);
            let node = ClassNode {
                key: key.clone(),
                repo: repo.to_string(),
                file_path: path.to_string(),
                name: class.name.clone(),
                kind: class.kind,
                is_data_model: class.is_data_model,
                is_api: class.is_api,
                logical,
                package: structure.package.clone(),
                superclasses: class.superclasses.clone(),
                methods: class.methods.iter().map(|m| m.name.clone()).collect(),
                start_line: class.start_line,
                end_line: class.end_line,
                doc_comment: class.doc_comment.clone(),
            };
            self.db.upsert_node(NodeKind::Class, &key, &node).await?;
            self.edge(EdgeRecord::new(repo, EdgeKind::Contains, (&file, NodeKind::File), (&key, NodeKind::Class)), path)
                .await?;
            owners.insert(
                class.owner_name(),
                EntitySpan {
                    owner: class.owner_name(),
                    key: key.clone(),
                    kind: NodeKind::Class,
                    start_line: class.start_line,
                    end_line: class.end_line,
                },
            );
            classes.insert(class.name.as_str(), (key, logical));
            report.classes += 1;
        }

        // Endpoints, under the declaring class or the file
        for endpoint in &structure.endpoints {
            let class = endpoint
                .owner_class
                .as_deref()
                .and_then(|name| classes.get(name))
                .or_else(|| {
                    structure
                        .enclosing_class(endpoint.line)
                        .and_then(|c| classes.get(c.name.as_str()))
                });
            let (owner, owner_kind, logical) = match class {
                Some((key, logical)) => (key.clone(), NodeKind::Class, *logical),
                None => (file.clone(), NodeKind::File, false),
            };
            let key = endpoint_key(&owner, &endpoint.route, &endpoint.method);
            let node = ApiEndpointNode {
                key: key.clone(),
                repo: repo.to_string(),
                file_path: path.to_string(),
                route: endpoint.route.clone(),
                method: endpoint.method.clone(),
                handler: endpoint.handler.clone(),
                framework: endpoint.framework.clone(),
                line: endpoint.line,
                owner: owner.clone(),
                request_type: endpoint.request_type.clone(),
                response_type: endpoint.response_type.clone(),
                logical,
            };
            self.db.upsert_node(NodeKind::ApiEndpoint, &key, &node).await?;
            let edge = EdgeRecord::new(repo, EdgeKind::Contains, (&owner, owner_kind), (&key, NodeKind::ApiEndpoint));
            self.shared_edge(edge, path, logical).await?;
            report.endpoints += 1;
        }

        // Data models, under their class
        for model in &structure.data_models {
            let Some((class, logical)) = classes.get(model.class_name.as_str()) else {
                debug!(repo, path, model = %model.name, "Data model without a declaring class");
                continue;
            };
            let key = data_model_key(class);
            let node = DataModelNode {
                key: key.clone(),
                repo: repo.to_string(),
                file_path: path.to_string(),
                name: model.name.clone(),
                class_key: class.clone(),
                source: model.source.clone(),
                fields: model.fields.clone(),
                logical: *logical,
            };
            self.db.upsert_node(NodeKind::DataModel, &key, &node).await?;
            let edge = EdgeRecord::new(repo, EdgeKind::Contains, (class, NodeKind::Class), (&key, NodeKind::DataModel));
            self.shared_edge(edge, path, *logical).await?;
            report.data_models += 1;
        }

        // Chunks, under their most specific owner
        let spans: Vec<EntitySpan> = owners.values().cloned().collect();
        for chunk in &load.chunks {
            let key = chunk_key(repo, path, &chunk.owner, chunk.index);
            let node = CodeChunk {
                key: key.clone(),
                repo: repo.to_string(),
                file_path: path.to_string(),
                owner: chunk.owner.clone(),
                index: chunk.index,
                content: chunk.content.clone(),
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                embedding_status: EmbeddingStatus::Pending,
                model: None,
                dimensions: None,
            };
            self.db.upsert_node(NodeKind::CodeChunk, &key, &node).await?;

            let named = (chunk.owner != FILE_OWNER).then(|| owners.get(&chunk.owner)).flatten();
            let (parent, parent_kind) =
                chunk_parent(repo, named, &spans, Some(&file), chunk.start_line, chunk.end_line);
            if parent_kind == NodeKind::Repository {
                warn!(repo, path, chunk = %key, "Chunk attached to repository, no file context");
                report.fallback_edges += 1;
            }
            self.edge(EdgeRecord::new(repo, EdgeKind::Contains, (&parent, parent_kind), (&key, NodeKind::CodeChunk)), path)
                .await?;
            report.chunks += 1;
        }

        // Imports
        let mut seen = HashSet::new();
        for import in &structure.imports {
            let target = resolver
                .resolve(path, structure.language, import)
                .filter(|target| target != path)
                .map(|target| file_key(repo, &target));
            let edge = EdgeRecord::import(repo, &file, &import.display_name(), import.line, target.as_deref());
            if !seen.insert(edge.key.clone()) {
                continue;
            }
            if !edge.is_resolved() {
                report.unresolved_imports += 1;
            }
            self.edge(edge, path).await?;
            report.imports += 1;
        }

        debug!(
            repo,
            path,
            functions = structure.functions.len(),
            classes = structure.classes.len(),
            chunks = load.chunks.len(),
            "Loaded file"
        );
        Ok(())
    }

    async fn edge(&self, edge: EdgeRecord, origin: &str) -> Result<(), KnowledgeError> {
        self.db.upsert_edge(&edge.with_origin(origin)).await
    }

    /// Edges inside a shared protobuf definition belong to no single file.
    async fn shared_edge(&self, edge: EdgeRecord, origin: &str, logical: bool) -> Result<(), KnowledgeError> {
        if logical {
            self.db.upsert_edge(&edge).await
        } else {
            self.edge(edge, origin).await
        }
    }

    /// Recompute every INHERITS_FROM edge of a repository from the stored
    /// classes and imports. Returns how many edges exist afterwards.
    pub async fn link_inheritance(&self, repo: &str) -> Result<usize, KnowledgeError> {
        let classes = self.db.classes(repo).await?;
        let paths: HashMap<String, String> = self
            .db
            .files(repo)
            .await?
            .into_iter()
            .map(|f| (f.key, f.path))
            .collect();
        let edges = self.db.edges(repo).await?;

        let mut imported: HashMap<&str, HashSet<String>> = HashMap::new();
        for edge in edges.iter().filter(|e| e.kind == EdgeKind::Imports) {
            let (Some(from), Some(to)) = (paths.get(&edge.src), edge.dst.as_ref().and_then(|d| paths.get(d))) else {
                continue;
            };
            imported.entry(from.as_str()).or_default().insert(to.clone());
        }

        let mut resolver = InheritanceResolver::default();
        for class in &classes {
            resolver.add(&class.name, &class.key, &class.file_path);
        }

        let empty = HashSet::new();
        let mut wanted: HashMap<String, EdgeRecord> = HashMap::new();
        for class in &classes {
            let imports = imported.get(class.file_path.as_str()).unwrap_or(&empty);
            for superclass in &class.superclasses {
                let Some(target) = resolver.resolve(superclass, &class.file_path, &class.key, imports) else {
                    continue;
                };
                let mut edge = EdgeRecord::new(
                    repo,
                    EdgeKind::InheritsFrom,
                    (&class.key, NodeKind::Class),
                    (&target, NodeKind::Class),
                );
                edge.name = Some(superclass.clone());
                if !class.logical {
                    edge = edge.with_origin(&class.file_path);
                }
                wanted.insert(edge.key.clone(), edge);
            }
        }

        for stale in edges
            .iter()
            .filter(|e| e.kind == EdgeKind::InheritsFrom && !wanted.contains_key(&e.key))
        {
            self.db.delete_edge(&stale.key).await?;
        }
        for edge in wanted.values() {
            self.db.upsert_edge(edge).await?;
        }
        Ok(wanted.len())
    }

    /// Store vectors and record each chunk's embedding status.
    async fn write_vectors(
        &self,
        repo: &str,
        updates: &[VectorUpdate],
        report: &mut LoadReport,
    ) -> Result<(), KnowledgeError> {
        for update in updates {
            match &update.embedding {
                Some(embedding) => {
                    self.db
                        .upsert_vector(&ChunkVector {
                            chunk: update.chunk.clone(),
                            repo: repo.to_string(),
                            file_path: update.file_path.clone(),
                            embedding: embedding.clone(),
                        })
                        .await?;
                    self.db
                        .set_embedding_status(&update.chunk, EmbeddingStatus::Embedded, Some(&self.model), Some(self.dimensions))
                        .await?;
                    report.vectors += 1;
                }
                None => {
                    self.db
                        .set_embedding_status(&update.chunk, EmbeddingStatus::Failed, None, None)
                        .await?;
                    report.failed_embeddings += 1;
                }
            }
        }
        Ok(())
    }

    /// Remove files that left the working tree, then any shared protobuf
    /// definition no remaining file contains.
    pub async fn prune_files(&self, repo: &str, paths: &[String]) -> Result<usize, KnowledgeError> {
        let _guard = self.db.lock_repository(repo).await;
        for path in paths {
            self.db.delete_file_subtree(repo, path, true).await?;
            debug!(repo, path = %path, "Pruned file");
        }
        self.db.sweep_logical_orphans(repo).await?;
        Ok(paths.len())
    }

    /// Replace a repository's services with `detected`.
    ///
    /// Services are derived from the whole tree, so every run rewrites them
    /// rather than patching per file. Membership edges are only written for
    /// files present in the graph.
    pub async fn load_services(&self, repo: &str, detected: &DetectedServices) -> Result<ServiceReport, KnowledgeError> {
        let _guard = self.db.lock_repository(repo).await;
        let mut report = ServiceReport {
            replaced: self.db.delete_services(repo).await?,
            ..ServiceReport::default()
        };
        let stored: HashSet<String> = self.db.file_hashes(repo).await?.into_keys().collect();

        for service in &detected.services {
            self.db.upsert_node(NodeKind::Service, &service.key, service).await?;
            self.db
                .upsert_edge(&EdgeRecord::new(
                    repo,
                    EdgeKind::BelongsTo,
                    (&service.key, NodeKind::Service),
                    (repo, NodeKind::Repository),
                ))
                .await?;
            report.services += 1;

            for path in detected.members.get(&service.name).into_iter().flatten() {
                if !stored.contains(path) {
                    continue;
                }
                let file = file_key(repo, path);
                self.db
                    .upsert_edge(&EdgeRecord::new(
                        repo,
                        EdgeKind::Contains,
                        (&service.key, NodeKind::Service),
                        (&file, NodeKind::File),
                    ))
                    .await?;
                report.files += 1;
            }

            for dependency in &service.depends_on {
                let Some(target) = detected.get(dependency) else {
                    debug!(repo, service = %service.name, dependency = %dependency, "Dependency names no detected service");
                    report.unresolved_dependencies += 1;
                    continue;
                };
                let mut edge = EdgeRecord::new(
                    repo,
                    EdgeKind::DependsOn,
                    (&service.key, NodeKind::Service),
                    (&target.key, NodeKind::Service),
                );
                edge.name = Some(dependency.clone());
                self.db.upsert_edge(&edge).await?;
                report.dependencies += 1;
            }
        }

        info!(
            repo,
            services = report.services,
            files = report.files,
            dependencies = report.dependencies,
            "Loaded services"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunker::Chunker;
    use crate::knowledge::models::RepositoryStatus;
    use crate::knowledge::parser::ParserRegistry;

    const REPO: &str = "https://example.com/acme/shop@main";

    fn repository() -> RepositoryNode {
        RepositoryNode {
            key: REPO.into(),
            url: "https://example.com/acme/shop".into(),
            branch: "main".into(),
            name: "shop".into(),
            description: None,
            last_indexed_commit: None,
            last_indexed_at: None,
            status: RepositoryStatus::Processing,
            error: None,
            job_id: None,
            detect_services: false,
            updated_at: chrono::Utc::now(),
        }
    }

    fn file_load(path: &str, content: &str, dims: usize) -> FileLoad {
        let structure = ParserRegistry::new().parse(path, content);
        let chunks = Chunker::new(200).chunk_file(&structure, content);
        let vectors = chunks.iter().map(|_| Some(vec![0.5; dims])).collect();
        FileLoad {
            structure,
            size: content.len() as u64,
            content_hash: crate::knowledge::identity::content_hash(content),
            chunks,
            vectors,
        }
    }

    fn contains(edges: &[EdgeRecord], src: &str, dst: &str) -> bool {
        edges
            .iter()
            .any(|e| e.kind == EdgeKind::Contains && e.src == src && e.dst.as_deref() == Some(dst))
    }

    #[test]
    fn test_most_specific_owner_prefers_smallest() {
        let spans = vec![
            EntitySpan { owner: "class:A".into(), key: "class".into(), kind: NodeKind::Class, start_line: 1, end_line: 20 },
            EntitySpan { owner: "fn:a:5".into(), key: "fn".into(), kind: NodeKind::Function, start_line: 5, end_line: 8 },
        ];
        assert_eq!(most_specific_owner(&spans, 5, 7).map(|s| s.key.as_str()), Some("fn"));
        assert_eq!(most_specific_owner(&spans, 2, 6).map(|s| s.key.as_str()), Some("class"));
        assert!(most_specific_owner(&spans, 19, 22).is_none());
    }

    #[test]
    fn test_chunk_parent_falls_back_in_order() {
        assert_eq!(chunk_parent("r", None, &[], Some("f"), 1, 2), ("f".to_string(), NodeKind::File));
        assert_eq!(chunk_parent("r", None, &[], None, 1, 2), ("r".to_string(), NodeKind::Repository));
    }

    #[tokio::test]
    async fn test_load_connects_hierarchy() {
        let db = Arc::new(GraphDb::in_memory().await.unwrap());
        let loader = GraphLoader::new(db.clone(), "test", 3);
        let files = vec![
            file_load("a.py", "import b\n\ndef foo():\n    return 1\n", 3),
            file_load("b.py", "class Bar:\n    def baz(self):\n        pass\n", 3),
        ];
        let resolver = ImportResolver::new(["a.py", "b.py"]);

        let report = loader.load(&repository(), &files, &[], &resolver, &|| false).await.unwrap();
        assert_eq!(report.files, 2);
        assert_eq!(report.functions, 1);
        assert_eq!(report.classes, 1);
        assert_eq!(report.fallback_edges, 0);
        assert_eq!(report.vectors, report.chunks);

        let edges = db.edges(REPO).await.unwrap();
        let a = file_key(REPO, "a.py");
        let b = file_key(REPO, "b.py");
        assert!(contains(&edges, REPO, &a));
        assert!(contains(&edges, &a, &function_key(REPO, "a.py", "foo", 3)));
        assert!(contains(&edges, &b, &class_key(REPO, "b.py", "Bar")));
        let import = edges.iter().find(|e| e.kind == EdgeKind::Imports).unwrap();
        assert_eq!(import.dst.as_deref(), Some(b.as_str()));

        for chunk in db.chunks(REPO).await.unwrap() {
            assert_eq!(chunk.embedding_status, EmbeddingStatus::Embedded);
            assert!(edges
                .iter()
                .any(|e| e.kind == EdgeKind::Contains && e.dst.as_deref() == Some(chunk.key.as_str())));
        }
        let hashes = db.file_hashes(REPO).await.unwrap();
        assert_eq!(hashes["a.py"], files[0].content_hash);
    }

    #[tokio::test]
    async fn test_reload_is_idempotent() {
        let db = Arc::new(GraphDb::in_memory().await.unwrap());
        let loader = GraphLoader::new(db.clone(), "test", 3);
        let files = vec![file_load("b.py", "class Base:\n    pass\n\nclass Bar(Base):\n    pass\n", 3)];
        let resolver = ImportResolver::new(["b.py"]);

        loader.load(&repository(), &files, &[], &resolver, &|| false).await.unwrap();
        let first = db.stats(Some(REPO)).await.unwrap();
        loader.load(&repository(), &files, &[], &resolver, &|| false).await.unwrap();
        let second = db.stats(Some(REPO)).await.unwrap();

        assert_eq!(first.nodes, second.nodes);
        assert_eq!(first.edges, second.edges);
        assert_eq!(first.vectors, second.vectors);
        let inherits: Vec<_> = db
            .edges(REPO)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == EdgeKind::InheritsFrom)
            .collect();
        assert_eq!(inherits.len(), 1);
        assert_eq!(inherits[0].dst.as_deref(), Some(class_key(REPO, "b.py", "Base").as_str()));
    }

    #[tokio::test]
    async fn test_failed_vectors_mark_chunks() {
        let db = Arc::new(GraphDb::in_memory().await.unwrap());
        let loader = GraphLoader::new(db.clone(), "test", 3);
        let mut load = file_load("a.py", "def foo():\n    return 1\n", 3);
        load.vectors = load.chunks.iter().map(|_| None).collect();

        let report = loader
            .load(&repository(), &[load], &[], &ImportResolver::default(), &|| false)
            .await
            .unwrap();
        assert_eq!(report.vectors, 0);
        assert!(report.failed_embeddings > 0);
        assert_eq!(db.stats(Some(REPO)).await.unwrap().failed_embeddings, report.failed_embeddings);
    }

    #[tokio::test]
    async fn test_index_mismatch_rejected_before_writes() {
        let db = Arc::new(GraphDb::in_memory().await.unwrap());
        db.ensure_vector_index(8).await.unwrap();
        let loader = GraphLoader::new(db.clone(), "test", 3);

        let err = loader
            .load(&repository(), &[file_load("a.py", "x = 1\n", 3)], &[], &ImportResolver::default(), &|| false)
            .await
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::Configuration(_)));
        assert!(db.get_repository(REPO).await.unwrap().is_none());
        assert!(db.files(REPO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_endpoint_attaches_to_file_or_class() {
        let db = Arc::new(GraphDb::in_memory().await.unwrap());
        let loader = GraphLoader::new(db.clone(), "test", 3);
        let content = "from flask import Flask\napp = Flask(__name__)\n\n@app.route('/orders', methods=['GET'])\ndef orders():\n    return []\n";
        loader
            .load(&repository(), &[file_load("app.py", content, 3)], &[], &ImportResolver::new(["app.py"]), &|| false)
            .await
            .unwrap();

        let endpoints: Vec<ApiEndpointNode> = db.list_records("api_endpoint", REPO).await.unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].owner, file_key(REPO, "app.py"));
        let edges = db.edges(REPO).await.unwrap();
        assert!(contains(&edges, &file_key(REPO, "app.py"), &endpoints[0].key));
    }
}
