use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage::Stage;
use crate::knowledge::RepositoryStatus;

/// A request to ingest one repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestRequest {
    pub repository_url: String,
    /// Branch to ingest; the remote default branch when absent.
    pub branch: Option<String>,
    pub description: Option<String>,
    /// Re-run every stage even when the commit is unchanged.
    #[serde(default)]
    pub force_reindex: bool,
    /// Detect services on this and every later run of the repository.
    #[serde(default)]
    pub detect_services: bool,
}

impl IngestRequest {
    pub fn new(repository_url: impl Into<String>) -> Self {
        Self {
            repository_url: repository_url.into(),
            ..Self::default()
        }
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force_reindex = force;
        self
    }

    pub fn services(mut self, detect: bool) -> Self {
        self.detect_services = detect;
        self
    }
}

/// Durable record of one ingestion run, stored in the `job` table.
///
/// Status polling reads this record, so it is persisted at every stage
/// transition and as progress advances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique identifier for this run. Stored as `job_id`; `id` is the record id.
    #[serde(rename = "job_id")]
    pub id: String,
    /// Repository key (`<url>@<branch>`)
    pub repo: String,
    pub url: String,
    pub branch: String,
    pub stage: Stage,
    /// Overall progress, 0 to 100
    pub progress_percent: u8,
    /// Human-readable description of the current step
    pub message: Option<String>,
    /// Last error, set when the run failed
    pub error: Option<String>,
    /// Stage the run was in when it failed
    pub failed_stage: Option<Stage>,
    pub force_reindex: bool,
    /// Commit being ingested, once known
    pub commit: Option<String>,
    /// The commit was already indexed and the run did nothing
    pub skipped: bool,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Creates a new job in the `Requested` stage.
    pub fn new(repo: &str, url: &str, branch: &str, force_reindex: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            repo: repo.to_string(),
            url: url.to_string(),
            branch: branch.to_string(),
            stage: Stage::Requested,
            progress_percent: 0,
            message: None,
            error: None,
            failed_stage: None,
            force_reindex,
            commit: None,
            skipped: false,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Attempts to move to `stage`.
    ///
    /// Returns false, leaving the job unchanged, when the state machine does
    /// not allow the transition.
    pub fn enter(&mut self, stage: Stage) -> bool {
        if !self.stage.can_transition_to(stage) {
            return false;
        }
        if stage == Stage::Failed {
            self.failed_stage = Some(self.stage);
        } else {
            self.progress_percent = stage.progress_floor();
        }
        self.stage = stage;
        self.touch();
        if stage.is_terminal() {
            self.finished_at = Some(self.updated_at);
        }
        true
    }

    /// Records progress within the current stage. Returns true when the
    /// percentage changed.
    pub fn set_progress(&mut self, done: usize, total: usize) -> bool {
        let percent = self.stage.progress(done, total);
        if percent == self.progress_percent {
            return false;
        }
        self.progress_percent = percent;
        self.touch();
        true
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
        self.touch();
    }

    /// Moves to `Failed` with an error message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.enter(Stage::Failed);
    }

    /// Finishes without work because the commit was already indexed.
    pub fn skip(&mut self) {
        self.skipped = true;
        self.message = Some("commit already indexed".to_string());
        self.enter(Stage::Completed);
    }

    pub fn is_finished(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Whether a non-terminal job has gone quiet for longer than `stale_secs`.
    pub fn is_stale(&self, stale_secs: i64) -> bool {
        !self.is_finished() && (Utc::now() - self.updated_at).num_seconds() > stale_secs
    }

    pub fn status(&self) -> RepositoryStatus {
        self.stage.repository_status()
    }

    /// Status view returned to pollers.
    pub fn to_status(&self) -> JobStatus {
        JobStatus {
            job_id: self.id.clone(),
            repository: self.repo.clone(),
            status: self.status(),
            stage: self.stage,
            progress_percent: self.progress_percent,
            error: self.error.clone(),
            message: self.message.clone(),
            skipped: self.skipped,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// What a status poll returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub repository: String,
    pub status: RepositoryStatus,
    pub stage: Stage,
    pub progress_percent: u8,
    pub error: Option<String>,
    pub message: Option<String>,
    pub skipped: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobRecord {
        JobRecord::new("https://example.com/acme/shop@main", "https://example.com/acme/shop", "main", false)
    }

    #[test]
    fn test_new_job_is_requested() {
        let job = job();
        assert_eq!(job.stage, Stage::Requested);
        assert_eq!(job.status(), RepositoryStatus::Pending);
        assert!(!job.is_finished());
        assert!(!job.id.is_empty());
    }

    #[test]
    fn test_enter_follows_state_machine() {
        let mut job = job();
        assert!(!job.enter(Stage::Parsing));
        assert!(job.enter(Stage::Acquiring));
        assert_eq!(job.progress_percent, Stage::Acquiring.progress_floor());
        assert_eq!(job.status(), RepositoryStatus::Processing);
    }

    #[test]
    fn test_fail_records_stage_and_error() {
        let mut job = job();
        job.enter(Stage::Acquiring);
        job.enter(Stage::Parsing);
        job.fail("disk full");

        assert_eq!(job.stage, Stage::Failed);
        assert_eq!(job.failed_stage, Some(Stage::Parsing));
        assert_eq!(job.error.as_deref(), Some("disk full"));
        assert!(job.finished_at.is_some());
        assert!(!job.enter(Stage::Loading));
    }

    #[test]
    fn test_skip_completes_from_requested() {
        let mut job = job();
        job.skip();
        assert_eq!(job.stage, Stage::Completed);
        assert!(job.skipped);
        assert_eq!(job.to_status().progress_percent, 100);
    }

    #[test]
    fn test_progress_updates_only_on_change() {
        let mut job = job();
        job.enter(Stage::Acquiring);
        job.enter(Stage::Parsing);
        assert!(job.set_progress(1, 2));
        assert!(!job.set_progress(1, 2));
    }
}
