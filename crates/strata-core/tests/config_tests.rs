use strata_core::config::{
    ConfigError, DEFAULT_CHUNK_SIZE, DEFAULT_EMBEDDING_PROVIDER, DEFAULT_GRAPH_NAMESPACE,
    DEFAULT_MAX_FILE_SIZE,
};
use strata_core::Config;
use tempfile::TempDir;

#[test]
fn test_from_file_merges_with_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("strata.toml");
    std::fs::write(
        &path,
        r#"
[graph]
endpoint = "mem://"
write_retries = 5

[ingestion]
chunk_size = 400
exclude_dirs = ["vendor"]
"#,
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.graph.endpoint, "mem://");
    assert_eq!(config.graph.write_retries, 5);
    assert_eq!(config.graph.namespace, DEFAULT_GRAPH_NAMESPACE);
    assert_eq!(config.ingestion.chunk_size, 400);
    assert_eq!(config.ingestion.exclude_dirs, vec!["vendor"]);
    assert_eq!(config.ingestion.max_file_size, DEFAULT_MAX_FILE_SIZE);
    assert_eq!(config.embedding.provider, DEFAULT_EMBEDDING_PROVIDER);
}

#[test]
fn test_from_file_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("strata.toml");
    std::fs::write(&path, "[ingestion]\nchunk_size = 0\n").unwrap();
    assert!(matches!(Config::from_file(&path), Err(ConfigError::Invalid(_))));

    std::fs::write(&path, "[ingestion\nchunk_size = ").unwrap();
    assert!(matches!(Config::from_file(&path), Err(ConfigError::ParseError(_))));

    let missing = dir.path().join("missing.toml");
    assert!(matches!(Config::from_file(&missing), Err(ConfigError::ReadError(_))));
}

#[test]
fn test_rendered_config_reads_back() {
    let mut config = Config::default();
    config.graph.password = Some("hunter2".into());
    config.embedding.api_key = Some("sk-secret".into());
    config.ingestion.chunk_size = 750;

    let rendered = config.to_toml();
    assert!(!rendered.contains("hunter2"));
    assert!(!rendered.contains("sk-secret"));

    let parsed: Config = toml::from_str(&rendered).unwrap();
    assert_eq!(parsed.ingestion.chunk_size, 750);
    assert_eq!(parsed.ingestion.target_extensions, config.ingestion.target_extensions);
    assert!(parsed.graph.password.is_none());
    assert!(parsed.embedding.api_key.is_none());

    let defaults: Config = toml::from_str(&Config::default_config_string()).unwrap();
    assert_eq!(defaults.ingestion.chunk_size, DEFAULT_CHUNK_SIZE);
}
