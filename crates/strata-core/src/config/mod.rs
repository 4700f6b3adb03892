//! Configuration management for Strata.
//!
//! Configuration is loaded from multiple sources with the following priority:
//! 1. Environment variables (highest priority)
//! 2. Project-local `strata.toml` file
//! 3. User config `~/.config/strata/config.toml`
//! 4. Built-in defaults (lowest priority)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod defaults;

pub use defaults::*;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Graph store connection.
    pub graph: GraphConfig,

    /// Embedding provider configuration.
    pub embedding: EmbeddingConfig,

    /// Ingestion pipeline configuration.
    pub ingestion: IngestionConfig,

    /// Log verbosity.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// Searches for config in order:
    /// 1. `./strata.toml` (project local)
    /// 2. `~/.config/strata/config.toml` (user config)
    /// 3. Falls back to defaults
    ///
    /// Environment overrides are applied in every case.
    pub fn load() -> Result<Self, ConfigError> {
        if Path::new("strata.toml").exists() {
            return Self::from_file("strata.toml");
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("strata").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Graph store
        if let Some(endpoint) = var("STRATA_GRAPH_ENDPOINT") {
            self.graph.endpoint = endpoint;
        }
        if let Some(username) = var("STRATA_GRAPH_USERNAME") {
            self.graph.username = Some(username);
        }
        if let Some(password) = var("STRATA_GRAPH_PASSWORD") {
            self.graph.password = Some(password);
        }

        // Embedding
        if let Some(provider) = var("STRATA_EMBEDDING_PROVIDER") {
            self.embedding.provider = provider;
        }
        if let Some(model) = var("STRATA_EMBEDDING_MODEL") {
            self.embedding.model = Some(model);
        }
        if let Some(dims) = var("EMBEDDING_DIMENSIONS").or_else(|| var("STRATA_EMBEDDING_DIMENSIONS")) {
            if let Ok(n) = dims.trim().parse() {
                self.embedding.dimensions = n;
            }
        }
        if let Some(url) = var("STRATA_EMBEDDING_BASE_URL") {
            self.embedding.base_url = Some(url);
        }
        if let Some(key) = var("STRATA_EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(key);
        }

        // Ingestion
        if let Some(exts) = var("STRATA_TARGET_EXTENSIONS") {
            self.ingestion.target_extensions = parse_extension_list(&exts);
        }

        // Logging
        if let Some(level) = var("STRATA_LOG") {
            self.logging.level = level;
        }
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Invalid("embedding.dimensions must be greater than 0".into()));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid("embedding.batch_size must be greater than 0".into()));
        }
        if self.embedding.max_attempts == 0 {
            return Err(ConfigError::Invalid("embedding.max_attempts must be greater than 0".into()));
        }
        if !EMBEDDING_PROVIDERS.contains(&self.embedding.provider.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "unknown embedding provider '{}' (expected one of: {})",
                self.embedding.provider,
                EMBEDDING_PROVIDERS.join(", ")
            )));
        }
        if self.ingestion.chunk_size == 0 {
            return Err(ConfigError::Invalid("ingestion.chunk_size must be greater than 0".into()));
        }
        if self.ingestion.target_extensions.is_empty() {
            return Err(ConfigError::Invalid("ingestion.target_extensions is empty".into()));
        }
        Ok(())
    }

    /// Render as TOML. Secrets are not serialized.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Create a default config file content as a string.
    pub fn default_config_string() -> String {
        Config::default().to_toml()
    }
}

/// Split a comma separated extension list, dropping leading dots.
pub fn parse_extension_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

/// Graph store connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// SurrealDB endpoint: `rocksdb://path`, `mem://` or `ws://host:port`.
    pub endpoint: String,

    /// Namespace to use.
    pub namespace: String,

    /// Database to use.
    pub database: String,

    /// Root user for remote endpoints.
    pub username: Option<String>,

    /// Root password for remote endpoints.
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Attempts for writes failing with transient errors.
    pub write_retries: u32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_GRAPH_ENDPOINT.to_string(),
            namespace: DEFAULT_GRAPH_NAMESPACE.to_string(),
            database: DEFAULT_GRAPH_DATABASE.to_string(),
            username: None,
            password: None,
            write_retries: DEFAULT_GRAPH_WRITE_RETRIES,
        }
    }
}

impl GraphConfig {
    /// In-memory store, used by tests and dry runs.
    pub fn in_memory() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            ..Self::default()
        }
    }

    /// Whether the endpoint is a remote server that needs credentials.
    pub fn is_remote(&self) -> bool {
        ["ws://", "wss://", "http://", "https://"]
            .iter()
            .any(|scheme| self.endpoint.starts_with(scheme))
    }
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider name: "fastembed" or "openai" (any OpenAI-compatible API).
    pub provider: String,

    /// Model identifier (provider-specific).
    pub model: Option<String>,

    /// Vector dimensionality. Fixed for the lifetime of the vector index.
    pub dimensions: usize,

    /// Base URL for OpenAI-compatible providers.
    pub base_url: Option<String>,

    /// API key (can also be set via environment variable).
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Texts per provider request.
    pub batch_size: usize,

    /// Requests in flight at once.
    pub concurrency: usize,

    /// Attempts per batch before it is marked failed.
    pub max_attempts: u32,

    /// First retry delay in milliseconds.
    pub initial_backoff_ms: u64,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_EMBEDDING_PROVIDER.to_string(),
            model: None,
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            base_url: None,
            api_key: None,
            batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            concurrency: DEFAULT_EMBEDDING_CONCURRENCY,
            max_attempts: DEFAULT_EMBEDDING_MAX_ATTEMPTS,
            initial_backoff_ms: DEFAULT_EMBEDDING_BACKOFF_MS,
            request_timeout_secs: DEFAULT_EMBEDDING_TIMEOUT_SECS,
        }
    }
}

impl EmbeddingConfig {
    /// Get the model name, falling back to provider defaults.
    pub fn model_or_default(&self) -> String {
        self.model.clone().unwrap_or_else(|| match self.provider.as_str() {
            "openai" => DEFAULT_OPENAI_EMBEDDING_MODEL.to_string(),
            _ => DEFAULT_FASTEMBED_MODEL.to_string(),
        })
    }

    /// Get the base URL, falling back to the OpenAI default.
    pub fn base_url_or_default(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string())
    }

    /// Get API key from config or environment.
    pub fn api_key_or_env(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("STRATA_EMBEDDING_API_KEY").ok())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

/// Ingestion pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// File extensions to ingest (without leading dot).
    pub target_extensions: Vec<String>,

    /// Directories to skip while walking a working tree.
    pub exclude_dirs: Vec<String>,

    /// Files larger than this are skipped (bytes).
    pub max_file_size: u64,

    /// Maximum characters per chunk.
    pub chunk_size: usize,

    /// Directory where working trees are cloned.
    pub workspace_dir: String,

    /// Files parsed in parallel (0 = number of CPUs).
    pub parse_workers: usize,

    /// Timeout for clone/fetch operations in seconds.
    pub clone_timeout_secs: u64,

    /// Seconds after which a `processing` job is treated as abandoned.
    pub stale_job_secs: i64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            target_extensions: DEFAULT_TARGET_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            exclude_dirs: DEFAULT_EXCLUDE_DIRS.iter().map(|s| s.to_string()).collect(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            workspace_dir: DEFAULT_WORKSPACE_DIR.to_string(),
            parse_workers: 0,
            clone_timeout_secs: DEFAULT_CLONE_TIMEOUT_SECS,
            stale_job_secs: DEFAULT_STALE_JOB_SECS,
        }
    }
}

impl IngestionConfig {
    pub fn workspace_path(&self) -> PathBuf {
        PathBuf::from(&self.workspace_dir)
    }

    /// Worker count for parsing, resolving 0 to the available parallelism.
    pub fn effective_parse_workers(&self) -> usize {
        if self.parse_workers > 0 {
            return self.parse_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }

    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs.max(1))
    }

    /// Whether a repository-relative path has a target extension.
    pub fn is_target(&self, path: &str) -> bool {
        Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                self.target_extensions
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level or filter directive understood by `tracing-subscriber`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.embedding.dimensions, DEFAULT_EMBEDDING_DIMENSIONS);
        assert_eq!(config.embedding.provider, DEFAULT_EMBEDDING_PROVIDER);
        assert_eq!(config.graph.endpoint, DEFAULT_GRAPH_ENDPOINT);
        assert_eq!(config.ingestion.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_to_toml() {
        let mut config = Config::default();
        config.embedding.api_key = Some("secret".into());
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[graph]"));
        assert!(toml_str.contains("[embedding]"));
        assert!(toml_str.contains("[ingestion]"));
        assert!(toml_str.contains("[logging]"));
        assert!(!toml_str.contains("secret"));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[graph]
endpoint = "mem://"

[embedding]
provider = "openai"
dimensions = 1536

[ingestion]
target_extensions = ["py", "proto"]
chunk_size = 500
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.graph.endpoint, "mem://");
        assert_eq!(config.embedding.provider, "openai");
        assert_eq!(config.embedding.dimensions, 1536);
        assert_eq!(config.embedding.model_or_default(), DEFAULT_OPENAI_EMBEDDING_MODEL);
        assert_eq!(config.ingestion.target_extensions, vec!["py", "proto"]);
        assert_eq!(config.ingestion.chunk_size, 500);
        // Untouched sections keep their defaults
        assert_eq!(config.graph.namespace, DEFAULT_GRAPH_NAMESPACE);
        assert_eq!(config.logging.level, DEFAULT_LOG_LEVEL);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("EMBEDDING_DIMENSIONS", "768"),
            ("STRATA_GRAPH_ENDPOINT", "ws://localhost:8000"),
            ("STRATA_TARGET_EXTENSIONS", ".py, .GO,,md"),
            ("STRATA_LOG", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.embedding.dimensions, 768);
        assert!(config.graph.is_remote());
        assert_eq!(config.ingestion.target_extensions, vec!["py", "go", "md"]);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.embedding.dimensions = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.embedding.provider = "word2vec".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.ingestion.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_is_target() {
        let config = IngestionConfig::default();
        assert!(config.is_target("src/app.py"));
        assert!(config.is_target("api/demo.PROTO"));
        assert!(!config.is_target("image.png"));
        assert!(!config.is_target("Makefile"));
    }
}
