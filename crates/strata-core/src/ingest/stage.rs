use serde::{Deserialize, Serialize};

use crate::knowledge::RepositoryStatus;

/// Stage of one ingestion run.
///
/// Runs progress linearly:
/// Requested → Acquiring → Parsing → Chunking → Embedding → Loading → Repairing → Completed
///
/// `Failed` is reachable from every non-terminal stage, and an unchanged
/// commit jumps from `Requested` straight to `Completed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Accepted, waiting for the skip check
    #[default]
    Requested,
    /// Cloning or updating the working tree
    Acquiring,
    /// Discovering and parsing changed files
    Parsing,
    /// Splitting parsed files into chunks
    Chunking,
    /// Generating chunk vectors
    Embedding,
    /// Writing nodes, edges and vectors
    Loading,
    /// Verifying and repairing containment
    Repairing,
    /// Finished successfully, or skipped because nothing changed
    Completed,
    /// Stopped by an error or cancellation
    Failed,
}

impl Stage {
    /// Returns the next stage on the success path.
    /// Returns None for terminal stages.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Requested => Some(Stage::Acquiring),
            Stage::Acquiring => Some(Stage::Parsing),
            Stage::Parsing => Some(Stage::Chunking),
            Stage::Chunking => Some(Stage::Embedding),
            Stage::Embedding => Some(Stage::Loading),
            Stage::Loading => Some(Stage::Repairing),
            Stage::Repairing => Some(Stage::Completed),
            Stage::Completed | Stage::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }

    /// Whether a run in this stage may move to `to`.
    pub fn can_transition_to(&self, to: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Stage::Failed
            || self.next() == Some(to)
            || (*self == Stage::Requested && to == Stage::Completed)
    }

    /// Overall progress when the stage begins.
    pub fn progress_floor(&self) -> u8 {
        match self {
            Stage::Requested => 0,
            Stage::Acquiring => 5,
            Stage::Parsing => 15,
            Stage::Chunking => 40,
            Stage::Embedding => 50,
            Stage::Loading => 75,
            Stage::Repairing => 95,
            Stage::Completed => 100,
            Stage::Failed => 0,
        }
    }

    /// Overall progress after `done` of `total` units of this stage.
    pub fn progress(&self, done: usize, total: usize) -> u8 {
        let floor = self.progress_floor();
        let Some(ceiling) = self.next().map(|n| n.progress_floor()) else {
            return floor;
        };
        if total == 0 {
            return floor;
        }
        let span = (ceiling - floor) as usize;
        floor + (span * done.min(total) / total) as u8
    }

    /// Repository status while a run sits in this stage.
    pub fn repository_status(&self) -> RepositoryStatus {
        match self {
            Stage::Requested => RepositoryStatus::Pending,
            Stage::Completed => RepositoryStatus::Completed,
            Stage::Failed => RepositoryStatus::Failed,
            _ => RepositoryStatus::Processing,
        }
    }

    /// Returns a human-readable name for the stage.
    pub fn display_name(&self) -> &'static str {
        match self {
            Stage::Requested => "Requested",
            Stage::Acquiring => "Acquiring",
            Stage::Parsing => "Parsing",
            Stage::Chunking => "Chunking",
            Stage::Embedding => "Embedding",
            Stage::Loading => "Loading",
            Stage::Repairing => "Repairing",
            Stage::Completed => "Completed",
            Stage::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_path_reaches_completed() {
        let mut stage = Stage::Requested;
        let mut visited = vec![stage];
        while let Some(next) = stage.next() {
            assert!(stage.can_transition_to(next));
            stage = next;
            visited.push(stage);
        }
        assert_eq!(stage, Stage::Completed);
        assert_eq!(visited.len(), 8);
    }

    #[test]
    fn test_failed_reachable_from_every_active_stage() {
        for stage in [
            Stage::Requested,
            Stage::Acquiring,
            Stage::Parsing,
            Stage::Chunking,
            Stage::Embedding,
            Stage::Loading,
            Stage::Repairing,
        ] {
            assert!(stage.can_transition_to(Stage::Failed), "{}", stage);
        }
        assert!(!Stage::Completed.can_transition_to(Stage::Failed));
    }

    #[test]
    fn test_skip_and_invalid_transitions() {
        assert!(Stage::Requested.can_transition_to(Stage::Completed));
        assert!(!Stage::Parsing.can_transition_to(Stage::Completed));
        assert!(!Stage::Parsing.can_transition_to(Stage::Acquiring));
    }

    #[test]
    fn test_progress_is_monotonic_within_stage() {
        assert_eq!(Stage::Parsing.progress(0, 10), 15);
        assert_eq!(Stage::Parsing.progress(5, 10), 27);
        assert_eq!(Stage::Parsing.progress(10, 10), 40);
        assert_eq!(Stage::Completed.progress(1, 1), 100);
        assert_eq!(Stage::Embedding.progress(3, 0), 50);
    }
}
