//! Post-load verification and repair of the containment hierarchy.
//!
//! Verification counts, per node type, how many nodes hang off their
//! structural parent. Repair re-derives a parent for every chunk that is
//! only reachable through the Repository (or not at all) from its recorded
//! line range, recreates missing containment edges from the parent keys
//! stored on nodes, and drops edges whose endpoints no longer exist. It
//! never deletes a node or a vector, and a second pass changes nothing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::db::GraphDb;
use super::error::KnowledgeError;
use super::identity::file_key;
use super::loader::{chunk_parent, EntitySpan};
use super::models::{CodeChunk, RepairReport, VerificationReport};
use super::ontology::{EdgeKind, EdgeRecord, NodeKind};
use super::parser::{class_owner_name, function_owner_name, FILE_OWNER};

/// Node kinds that must be contained by another node, with the kinds
/// allowed to contain them.
fn structural_parents(kind: NodeKind) -> &'static [NodeKind] {
    match kind {
        NodeKind::Repository => &[],
        NodeKind::File | NodeKind::Service => &[NodeKind::Repository],
        NodeKind::Function | NodeKind::Class => &[NodeKind::File],
        NodeKind::ApiEndpoint => &[NodeKind::Class, NodeKind::File],
        NodeKind::DataModel => &[NodeKind::Class],
        NodeKind::CodeChunk => &[NodeKind::Function, NodeKind::Class, NodeKind::File],
    }
}

/// Snapshot of one repository's nodes and edges.
struct GraphSnapshot {
    repo: String,
    nodes: HashMap<NodeKind, HashSet<String>>,
    edges: Vec<EdgeRecord>,
}

impl GraphSnapshot {
    async fn read(db: &GraphDb, repo: &str) -> Result<Self, KnowledgeError> {
        let mut nodes = HashMap::new();
        for kind in NodeKind::ALL {
            let keys: HashSet<String> = db.node_keys(kind, repo).await?.into_iter().collect();
            nodes.insert(kind, keys);
        }
        Ok(Self {
            repo: repo.to_string(),
            nodes,
            edges: db.edges(repo).await?,
        })
    }

    fn exists(&self, kind: NodeKind, key: &str) -> bool {
        self.nodes.get(&kind).is_some_and(|keys| keys.contains(key))
    }

    fn keys(&self, kind: NodeKind) -> impl Iterator<Item = &String> {
        self.nodes.get(&kind).into_iter().flatten()
    }

    fn is_dangling(&self, edge: &EdgeRecord) -> bool {
        if !self.exists(edge.src_kind, &edge.src) {
            return true;
        }
        match (&edge.dst, edge.dst_kind) {
            (Some(dst), Some(kind)) => !self.exists(kind, dst),
            _ => false,
        }
    }

    /// Parent kinds reaching each node through a live containment edge.
    fn parents(&self) -> HashMap<(NodeKind, &str), Vec<NodeKind>> {
        let mut parents: HashMap<(NodeKind, &str), Vec<NodeKind>> = HashMap::new();
        for edge in self.edges.iter().filter(|e| !self.is_dangling(e)) {
            let Some((dst, dst_kind)) = edge.dst.as_deref().zip(edge.dst_kind) else {
                continue;
            };
            match edge.kind {
                EdgeKind::Contains => parents.entry((dst_kind, dst)).or_default().push(edge.src_kind),
                // File and Service -> Repository point the other way
                EdgeKind::BelongsTo => parents
                    .entry((edge.src_kind, edge.src.as_str()))
                    .or_default()
                    .push(dst_kind),
                _ => {}
            }
        }
        parents
    }
}

/// Verifies and repairs the containment hierarchy of a repository.
pub struct OntologyRepair {
    db: Arc<GraphDb>,
}

impl OntologyRepair {
    pub fn new(db: Arc<GraphDb>) -> Self {
        Self { db }
    }

    /// Report containment health. Reads only.
    pub async fn verify(&self, repo: &str) -> Result<VerificationReport, KnowledgeError> {
        let snapshot = GraphSnapshot::read(&self.db, repo).await?;
        let parents = snapshot.parents();

        let mut report = VerificationReport {
            repository: repo.to_string(),
            ..VerificationReport::default()
        };

        for kind in NodeKind::ALL {
            let allowed = structural_parents(kind);
            let mut total = 0;
            let mut connected = 0;
            for key in snapshot.keys(kind) {
                total += 1;
                if allowed.is_empty() {
                    connected += 1;
                    continue;
                }
                let found = parents.get(&(kind, key.as_str()));
                if found.is_some_and(|p| p.iter().any(|k| allowed.contains(k))) {
                    connected += 1;
                } else if found.map_or(true, |p| p.is_empty()) {
                    report.orphan_count += 1;
                    if report.orphans.len() < VerificationReport::SAMPLE {
                        report.orphans.push(key.clone());
                    }
                }
            }
            let pct = if total == 0 {
                100.0
            } else {
                connected as f64 * 100.0 / total as f64
            };
            report.totals.insert(kind.label().to_string(), total);
            report.connected_pct_by_type.insert(kind.label().to_string(), pct);
        }

        for edge in &snapshot.edges {
            if snapshot.is_dangling(edge) {
                report.dangling_edge_count += 1;
            } else if edge.is_fallback() {
                report.fallback_edge_count += 1;
            } else if edge.kind == EdgeKind::Imports && !edge.is_resolved() {
                report.unresolved_imports += 1;
            }
        }

        debug!(
            repo,
            orphans = report.orphan_count,
            fallback_edges = report.fallback_edge_count,
            dangling_edges = report.dangling_edge_count,
            "Verified repository"
        );
        Ok(report)
    }

    /// Reconnect what verification would flag. Idempotent.
    pub async fn repair(&self, repo: &str) -> Result<RepairReport, KnowledgeError> {
        let _guard = self.db.lock_repository(repo).await;
        let mut report = RepairReport {
            repository: repo.to_string(),
            ..RepairReport::default()
        };

        // Dangling edges first, so the snapshot below reflects live edges only
        let snapshot = GraphSnapshot::read(&self.db, repo).await?;
        for edge in snapshot.edges.iter().filter(|e| snapshot.is_dangling(e)) {
            self.db.delete_edge(&edge.key).await?;
            report.dangling_edges_removed += 1;
        }
        let snapshot = GraphSnapshot::read(&self.db, repo).await?;
        let parents = snapshot.parents();
        let has_parent = |kind: NodeKind, key: &str| {
            parents
                .get(&(kind, key))
                .is_some_and(|p| p.iter().any(|k| structural_parents(kind).contains(k)))
        };

        report.relinked_nodes += self.relink_structure(&snapshot, &has_parent).await?;

        // Chunks reachable only through the repository, or not at all
        let fallback: HashMap<&str, &EdgeRecord> = snapshot
            .edges
            .iter()
            .filter(|e| e.is_fallback())
            .filter_map(|e| e.dst.as_deref().map(|dst| (dst, e)))
            .collect();
        let chunks: Vec<CodeChunk> = self
            .db
            .chunks(repo)
            .await?
            .into_iter()
            .filter(|c| !has_parent(NodeKind::CodeChunk, &c.key))
            .collect();
        if !chunks.is_empty() {
            let spans = self.entity_spans(&snapshot).await?;
            for chunk in &chunks {
                let file = file_key(repo, &chunk.file_path);
                let file = snapshot.exists(NodeKind::File, &file).then_some(file);
                let file_spans = spans.get(chunk.file_path.as_str()).map(Vec::as_slice).unwrap_or(&[]);
                let named = (chunk.owner != FILE_OWNER)
                    .then(|| file_spans.iter().find(|s| s.owner == chunk.owner))
                    .flatten();
                let (parent, parent_kind) =
                    chunk_parent(repo, named, file_spans, file.as_deref(), chunk.start_line, chunk.end_line);

                if parent_kind == NodeKind::Repository {
                    if !fallback.contains_key(chunk.key.as_str()) {
                        let edge = EdgeRecord::new(repo, EdgeKind::Contains, (repo, NodeKind::Repository), (&chunk.key, NodeKind::CodeChunk));
                        self.db.upsert_edge(&edge).await?;
                    }
                    warn!(repo, chunk = %chunk.key, path = %chunk.file_path, "No file context for chunk, keeping repository edge");
                    report.remaining_fallback_edges += 1;
                    continue;
                }

                let edge = EdgeRecord::new(repo, EdgeKind::Contains, (&parent, parent_kind), (&chunk.key, NodeKind::CodeChunk))
                    .with_origin(&chunk.file_path);
                self.db.upsert_edge(&edge).await?;
                report.reattached_chunks += 1;
                if let Some(shortcut) = fallback.get(chunk.key.as_str()) {
                    self.db.delete_edge(&shortcut.key).await?;
                    report.fallback_edges_removed += 1;
                }
            }
        }

        // Shortcuts left behind next to a structural parent
        for (chunk, edge) in &fallback {
            if has_parent(NodeKind::CodeChunk, chunk) {
                self.db.delete_edge(&edge.key).await?;
                report.fallback_edges_removed += 1;
            }
        }

        if report.changed() {
            info!(
                repo,
                reattached = report.reattached_chunks,
                fallback_removed = report.fallback_edges_removed,
                relinked = report.relinked_nodes,
                dangling_removed = report.dangling_edges_removed,
                "Repaired repository"
            );
        }
        Ok(report)
    }

    /// Recreate containment edges for nodes that record their parent.
    async fn relink_structure(
        &self,
        snapshot: &GraphSnapshot,
        has_parent: &(dyn Fn(NodeKind, &str) -> bool + Sync),
    ) -> Result<usize, KnowledgeError> {
        let repo = snapshot.repo.as_str();
        let mut relinked = 0;
        let mut link = Vec::new();

        if snapshot.exists(NodeKind::Repository, repo) {
            for file in self.db.files(repo).await? {
                if !has_parent(NodeKind::File, &file.key) {
                    link.push((
                        EdgeRecord::new(repo, EdgeKind::BelongsTo, (&file.key, NodeKind::File), (repo, NodeKind::Repository)),
                        Some(file.path.clone()),
                    ));
                }
            }
            for service in snapshot.keys(NodeKind::Service) {
                if !has_parent(NodeKind::Service, service) {
                    link.push((
                        EdgeRecord::new(repo, EdgeKind::BelongsTo, (service.as_str(), NodeKind::Service), (repo, NodeKind::Repository)),
                        None,
                    ));
                }
            }
        }
        for function in self.db.functions(repo).await? {
            let file = file_key(repo, &function.file_path);
            if !has_parent(NodeKind::Function, &function.key) && snapshot.exists(NodeKind::File, &file) {
                link.push((
                    EdgeRecord::new(repo, EdgeKind::Contains, (&file, NodeKind::File), (&function.key, NodeKind::Function)),
                    Some(function.file_path.clone()),
                ));
            }
        }
        for class in self.db.classes(repo).await? {
            let file = file_key(repo, &class.file_path);
            if !has_parent(NodeKind::Class, &class.key) && snapshot.exists(NodeKind::File, &file) {
                link.push((
                    EdgeRecord::new(repo, EdgeKind::Contains, (&file, NodeKind::File), (&class.key, NodeKind::Class)),
                    Some(class.file_path.clone()),
                ));
            }
        }
        for endpoint in self.db.endpoints(repo).await? {
            let owner_kind = if snapshot.exists(NodeKind::Class, &endpoint.owner) {
                NodeKind::Class
            } else if snapshot.exists(NodeKind::File, &endpoint.owner) {
                NodeKind::File
            } else {
                continue;
            };
            if !has_parent(NodeKind::ApiEndpoint, &endpoint.key) {
                link.push((
                    EdgeRecord::new(repo, EdgeKind::Contains, (&endpoint.owner, owner_kind), (&endpoint.key, NodeKind::ApiEndpoint)),
                    (!endpoint.logical).then(|| endpoint.file_path.clone()),
                ));
            }
        }
        for model in self.db.data_models(repo).await? {
            if !has_parent(NodeKind::DataModel, &model.key) && snapshot.exists(NodeKind::Class, &model.class_key) {
                link.push((
                    EdgeRecord::new(repo, EdgeKind::Contains, (&model.class_key, NodeKind::Class), (&model.key, NodeKind::DataModel)),
                    (!model.logical).then(|| model.file_path.clone()),
                ));
            }
        }

        for (edge, origin) in link {
            let edge = match origin {
                Some(path) => edge.with_origin(&path),
                None => edge,
            };
            self.db.upsert_edge(&edge).await?;
            relinked += 1;
        }
        Ok(relinked)
    }

    /// Functions and classes that can own chunks, grouped by file path.
    /// Classes are listed under every file that contains them.
    async fn entity_spans(
        &self,
        snapshot: &GraphSnapshot,
    ) -> Result<BTreeMap<String, Vec<EntitySpan>>, KnowledgeError> {
        let repo = snapshot.repo.as_str();
        let mut spans: BTreeMap<String, Vec<EntitySpan>> = BTreeMap::new();

        for function in self.db.functions(repo).await? {
            spans.entry(function.file_path.clone()).or_default().push(EntitySpan {
                owner: function_owner_name(&function.name, function.start_line),
                key: function.key,
                kind: NodeKind::Function,
                start_line: function.start_line,
                end_line: function.end_line,
            });
        }

        let files: HashMap<String, String> = self
            .db
            .files(repo)
            .await?
            .into_iter()
            .map(|f| (f.key, f.path))
            .collect();
        let mut class_files: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &snapshot.edges {
            if edge.kind == EdgeKind::Contains
                && edge.src_kind == NodeKind::File
                && edge.dst_kind == Some(NodeKind::Class)
            {
                if let (Some(path), Some(class)) = (files.get(&edge.src), edge.dst.as_deref()) {
                    class_files.entry(class).or_default().push(path.as_str());
                }
            }
        }
        for class in self.db.classes(repo).await? {
            let mut paths: Vec<String> = class_files
                .get(class.key.as_str())
                .map(|p| p.iter().map(|s| s.to_string()).collect())
                .unwrap_or_default();
            if !paths.contains(&class.file_path) {
                paths.push(class.file_path.clone());
            }
            for path in paths {
                spans.entry(path).or_default().push(EntitySpan {
                    owner: class_owner_name(&class.name),
                    key: class.key.clone(),
                    kind: NodeKind::Class,
                    start_line: class.start_line,
                    end_line: class.end_line,
                });
            }
        }
        Ok(spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunker::Chunker;
    use crate::knowledge::identity::content_hash;
    use crate::knowledge::loader::{FileLoad, GraphLoader};
    use crate::knowledge::identity::service_key;
    use crate::knowledge::models::{RepositoryNode, RepositoryStatus, ServiceNode};
    use crate::knowledge::parser::ParserRegistry;
    use crate::knowledge::resolve::ImportResolver;

    const REPO: &str = "https://example.com/acme/shop@main";

    async fn loaded() -> Arc<GraphDb> {
        let db = Arc::new(GraphDb::in_memory().await.unwrap());
        let content = "import os\n\ndef foo():\n    return 1\n\nclass Bar:\n    def baz(self):\n        pass\n";
        let structure = ParserRegistry::new().parse("a.py", content);
        let chunks = Chunker::new(1000).chunk_file(&structure, content);
        let load = FileLoad {
            structure,
            size: content.len() as u64,
            content_hash: content_hash(content),
            vectors: chunks.iter().map(|_| Some(vec![1.0, 0.0])).collect(),
            chunks,
        };
        let repository = RepositoryNode {
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
        };
        GraphLoader::new(db.clone(), "test", 2)
            .load(&repository, &[load], &[], &ImportResolver::new(["a.py"]), &|| false)
            .await
            .unwrap();
        db
    }

    /// Replace every chunk's containment edge with a repository shortcut.
    async fn break_chunks(db: &GraphDb) -> usize {
        let chunks = db.chunks(REPO).await.unwrap();
        for edge in db.edges(REPO).await.unwrap() {
            if edge.kind == EdgeKind::Contains && edge.dst_kind == Some(NodeKind::CodeChunk) {
                db.delete_edge(&edge.key).await.unwrap();
            }
        }
        for chunk in &chunks {
            let edge = EdgeRecord::new(REPO, EdgeKind::Contains, (REPO, NodeKind::Repository), (&chunk.key, NodeKind::CodeChunk));
            db.upsert_edge(&edge).await.unwrap();
        }
        chunks.len()
    }

    #[tokio::test]
    async fn test_clean_load_verifies_healthy() {
        let db = loaded().await;
        let report = OntologyRepair::new(db).verify(REPO).await.unwrap();
        assert!(report.is_healthy(), "{:?}", report);
        assert_eq!(report.totals["File"], 1);
        assert_eq!(report.connected_pct("CodeChunk"), 100.0);
        assert_eq!(report.unresolved_imports, 1);
    }

    #[tokio::test]
    async fn test_repair_reattaches_fallback_chunks() {
        let db = loaded().await;
        let broken = break_chunks(&db).await;
        let repair = OntologyRepair::new(db.clone());

        let before = repair.verify(REPO).await.unwrap();
        assert_eq!(before.fallback_edge_count, broken);
        assert!(before.connected_pct("CodeChunk") < 100.0);

        let report = repair.repair(REPO).await.unwrap();
        assert_eq!(report.reattached_chunks, broken);
        assert_eq!(report.fallback_edges_removed, broken);
        assert_eq!(report.remaining_fallback_edges, 0);

        let after = repair.verify(REPO).await.unwrap();
        assert!(after.is_healthy(), "{:?}", after);
        assert_eq!(db.chunks(REPO).await.unwrap().len(), broken);
        assert_eq!(db.stats(Some(REPO)).await.unwrap().vectors, broken);

        let edges = db.edges(REPO).await.unwrap();
        let function_chunk = db
            .chunks(REPO)
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.owner.starts_with("fn:foo"))
            .unwrap();
        let parent = edges
            .iter()
            .find(|e| e.kind == EdgeKind::Contains && e.dst.as_deref() == Some(function_chunk.key.as_str()))
            .unwrap();
        assert_eq!(parent.src_kind, NodeKind::Function);
    }

    #[tokio::test]
    async fn test_repair_is_idempotent() {
        let db = loaded().await;
        break_chunks(&db).await;
        let repair = OntologyRepair::new(db.clone());

        assert!(repair.repair(REPO).await.unwrap().changed());
        let edges = db.stats(Some(REPO)).await.unwrap().edges;
        let second = repair.repair(REPO).await.unwrap();
        assert!(!second.changed(), "{:?}", second);
        assert_eq!(db.stats(Some(REPO)).await.unwrap().edges, edges);
    }

    #[tokio::test]
    async fn test_repair_removes_dangling_and_relinks() {
        let db = loaded().await;
        let class = db.classes(REPO).await.unwrap().remove(0);
        for edge in db.edges(REPO).await.unwrap() {
            if edge.dst.as_deref() == Some(class.key.as_str()) {
                db.delete_edge(&edge.key).await.unwrap();
            }
        }
        let ghost = EdgeRecord::new(
            REPO,
            EdgeKind::InheritsFrom,
            (&class.key, NodeKind::Class),
            ("missing", NodeKind::Class),
        );
        db.upsert_edge(&ghost).await.unwrap();

        let repair = OntologyRepair::new(db.clone());
        let before = repair.verify(REPO).await.unwrap();
        assert_eq!(before.dangling_edge_count, 1);
        assert_eq!(before.orphan_count, 1);

        let report = repair.repair(REPO).await.unwrap();
        assert_eq!(report.dangling_edges_removed, 1);
        assert_eq!(report.relinked_nodes, 1);
        assert!(repair.verify(REPO).await.unwrap().is_healthy());
    }

    #[tokio::test]
    async fn test_repair_relinks_detached_service() {
        let db = loaded().await;
        let service = ServiceNode {
            key: service_key(REPO, "cart"),
            repo: REPO.into(),
            name: "cart".into(),
            language: Some("python".into()),
            directory: Some("src/cart".into()),
            manifest: None,
            images: Vec::new(),
            ports: Vec::new(),
            labels: Default::default(),
            depends_on: Vec::new(),
            file_count: 0,
        };
        db.upsert_node(NodeKind::Service, &service.key, &service).await.unwrap();

        let repair = OntologyRepair::new(db.clone());
        let before = repair.verify(REPO).await.unwrap();
        assert_eq!(before.totals["Service"], 1);
        assert_eq!(before.orphans, vec![service.key.clone()]);

        let report = repair.repair(REPO).await.unwrap();
        assert_eq!(report.relinked_nodes, 1);
        let after = repair.verify(REPO).await.unwrap();
        assert!(after.is_healthy(), "{:?}", after);
        assert_eq!(after.connected_pct("Service"), 100.0);
    }
}
