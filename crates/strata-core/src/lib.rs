pub mod config;
pub mod ingest;
pub mod knowledge;

pub use config::Config;
pub use ingest::{ClearScope, IngestRequest, Ingestor, JobStatus, Stage};
pub use knowledge::{KnowledgeError, KnowledgeGraph, KnowledgeStore};
