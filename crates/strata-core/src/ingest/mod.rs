//! Repository ingestion: acquisition, the stage machine and the orchestrator.
//!
//! # Components
//!
//! - [`Ingestor`] - Runs jobs, reports status, clears and rebuilds
//! - [`RepositorySource`] - Working trees from git ([`GitAcquirer`]) or plain
//!   directories ([`LocalSource`])
//! - [`Stage`] / [`JobRecord`] - Per-run state machine persisted in the store

pub mod acquire;
mod job;
mod pipeline;
mod stage;
pub mod walker;

pub use acquire::{Checkout, GitAcquirer, LocalSource, RepositorySource, LOCAL_BRANCH};
pub use job::{IngestRequest, JobRecord, JobStatus};
pub use pipeline::{ClearScope, IngestOutcome, Ingestor};
pub use stage::Stage;
