//! Knowledge graph and ingestion error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while ingesting or querying the knowledge graph.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// Clone, fetch, authentication or branch resolution failed.
    #[error("Acquisition error for {url}: {message}")]
    Acquisition { url: String, message: String },

    /// File parsing error.
    #[error("Parse error in {path}: {message}")]
    Parse { path: String, message: String },

    /// Embedding provider error.
    #[error("Embedding error: {message}")]
    Embedding { message: String, retryable: bool },

    /// Graph store read or write error.
    #[error("Graph write error: {message}")]
    GraphWrite { message: String, transient: bool },

    /// Invalid configuration, including vector dimension mismatches.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error.
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Entity not found.
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// Another run for the same repository and branch is active.
    #[error("Ingestion already in progress for {repository}")]
    AlreadyInProgress { repository: String },

    /// The run was cancelled between units of work.
    #[error("cancelled")]
    Cancelled,
}

impl KnowledgeError {
    pub fn acquisition(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Acquisition {
            url: url.into(),
            message: message.into(),
        }
    }

    /// A provider failure worth retrying (rate limit, 5xx, timeout).
    pub fn retryable_embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
            retryable: true,
        }
    }

    /// A provider failure that retrying will not fix.
    pub fn terminal_embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the operation that produced this error may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Embedding { retryable, .. } => *retryable,
            Self::GraphWrite { transient, .. } => *transient,
            _ => false,
        }
    }
}

impl From<std::io::Error> for KnowledgeError {
    fn from(err: std::io::Error) -> Self {
        KnowledgeError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<surrealdb::Error> for KnowledgeError {
    fn from(err: surrealdb::Error) -> Self {
        // Api errors come from the transport layer; Db errors from the engine
        // (schema, constraint and query errors), which a retry cannot fix.
        let transient = matches!(err, surrealdb::Error::Api(_));
        KnowledgeError::GraphWrite {
            message: err.to_string(),
            transient,
        }
    }
}

impl From<ConfigError> for KnowledgeError {
    fn from(err: ConfigError) -> Self {
        KnowledgeError::Configuration(err.to_string())
    }
}
