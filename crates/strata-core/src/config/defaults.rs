//! Default values for Strata configuration.
//!
//! All hardcoded defaults are centralized here for easy maintenance.

// ============================================================================
// Graph Store Defaults
// ============================================================================

/// Default SurrealDB endpoint (embedded RocksDB under the data directory).
pub const DEFAULT_GRAPH_ENDPOINT: &str = "rocksdb://.strata/graph.db";

/// Default SurrealDB namespace.
pub const DEFAULT_GRAPH_NAMESPACE: &str = "strata";

/// Default SurrealDB database.
pub const DEFAULT_GRAPH_DATABASE: &str = "knowledge";

/// Attempts for a graph write that fails with a transient error.
pub const DEFAULT_GRAPH_WRITE_RETRIES: u32 = 3;

/// Initial delay before retrying a transient graph write (milliseconds).
pub const DEFAULT_GRAPH_RETRY_BACKOFF_MS: u64 = 200;

// ============================================================================
// Embedding Defaults
// ============================================================================

/// Default embedding provider.
pub const DEFAULT_EMBEDDING_PROVIDER: &str = "fastembed";

/// Default local embedding model (BGE small, English, v1.5).
pub const DEFAULT_FASTEMBED_MODEL: &str = "BAAI/bge-small-en-v1.5";

/// Default OpenAI-compatible embedding model.
pub const DEFAULT_OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default OpenAI-compatible API base URL.
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Default vector dimensionality (BGE small).
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;

/// Chunks sent to the provider per request.
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 100;

/// Embedding requests in flight at once.
pub const DEFAULT_EMBEDDING_CONCURRENCY: usize = 4;

/// Attempts per batch before the batch is marked failed.
pub const DEFAULT_EMBEDDING_MAX_ATTEMPTS: u32 = 5;

/// Initial retry delay; doubled after every failed attempt (milliseconds).
pub const DEFAULT_EMBEDDING_BACKOFF_MS: u64 = 1000;

/// Upper bound for a single retry delay (milliseconds).
pub const MAX_EMBEDDING_BACKOFF_MS: u64 = 30_000;

/// Timeout for a single embedding request (seconds).
pub const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 60;

/// Supported embedding providers.
pub const EMBEDDING_PROVIDERS: &[&str] = &["fastembed", "openai"];

// ============================================================================
// Ingestion Defaults
// ============================================================================

/// Maximum characters per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Maximum size of a single file to ingest (1 MB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Directory holding cloned working trees.
pub const DEFAULT_WORKSPACE_DIR: &str = ".strata/repos";

/// Timeout for clone and fetch operations (seconds).
pub const DEFAULT_CLONE_TIMEOUT_SECS: u64 = 600;

/// A `processing` job not updated for this long is considered abandoned (seconds).
pub const DEFAULT_STALE_JOB_SECS: i64 = 3600;

/// Default file extensions to ingest (without leading dot).
pub const DEFAULT_TARGET_EXTENSIONS: &[&str] = &[
    // Python
    "py",
    // Go
    "go",
    // C#
    "cs",
    // Java
    "java",
    // JavaScript/TypeScript
    "js", "jsx", "mjs", "cjs", "ts", "tsx",
    // Documentation
    "md",
    // Config
    "yaml", "yml",
    // IDL
    "proto",
];

/// Directories never descended into.
pub const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    // Version control
    ".git",
    ".svn",
    ".hg",
    // Dependencies
    "node_modules",
    "vendor",
    "venv",
    ".venv",
    "__pycache__",
    ".pytest_cache",
    // Build outputs
    "target",
    "build",
    "dist",
    "out",
    "bin",
    "obj",
    // IDE/Editor
    ".idea",
    ".vscode",
    ".vs",
    // Strata's own data
    ".strata",
];

// ============================================================================
// Logging Defaults
// ============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

// ============================================================================
// Query Defaults
// ============================================================================

/// Default number of results for vector search.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Length of the text preview returned with a search hit.
pub const SEARCH_PREVIEW_CHARS: usize = 200;
