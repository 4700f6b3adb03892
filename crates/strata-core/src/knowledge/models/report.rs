//! Ontology verification and repair reports.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Containment health of one repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub repository: String,
    /// Node count per type label.
    pub totals: BTreeMap<String, usize>,
    /// Percentage of nodes per type connected to their structural parent.
    pub connected_pct_by_type: BTreeMap<String, f64>,
    /// Nodes with no containment edge at all.
    pub orphan_count: usize,
    /// Keys of up to [`VerificationReport::SAMPLE`] orphans.
    pub orphans: Vec<String>,
    /// Repository -> CodeChunk shortcut edges.
    pub fallback_edge_count: usize,
    /// Edges whose source or target node no longer exists.
    pub dangling_edge_count: usize,
    /// Import edges without a target file.
    pub unresolved_imports: usize,
}

impl VerificationReport {
    pub const SAMPLE: usize = 20;

    /// Every node is connected and nothing hangs off the repository directly.
    pub fn is_healthy(&self) -> bool {
        self.orphan_count == 0
            && self.fallback_edge_count == 0
            && self.dangling_edge_count == 0
            && self.connected_pct_by_type.values().all(|pct| *pct >= 100.0)
    }

    pub fn connected_pct(&self, label: &str) -> f64 {
        self.connected_pct_by_type.get(label).copied().unwrap_or(100.0)
    }
}

/// What a repair pass changed. Repairs only touch edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    pub repository: String,
    /// Chunks moved from the repository (or from nothing) to a structural owner.
    pub reattached_chunks: usize,
    pub fallback_edges_removed: usize,
    /// Containment edges recreated for files, functions, classes, endpoints
    /// and data models.
    pub relinked_nodes: usize,
    pub dangling_edges_removed: usize,
    /// Fallback edges left because no file context exists for the chunk.
    pub remaining_fallback_edges: usize,
}

impl RepairReport {
    pub fn changed(&self) -> bool {
        self.reattached_chunks > 0
            || self.fallback_edges_removed > 0
            || self.relinked_nodes > 0
            || self.dangling_edges_removed > 0
    }
}
