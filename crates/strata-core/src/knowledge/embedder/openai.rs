//! Embeddings from any OpenAI-compatible `/embeddings` endpoint.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::knowledge::error::KnowledgeError;

/// OpenAI-compatible embeddings client.
///
/// Works with OpenAI, Azure OpenAI, Ollama, vLLM and other servers that
/// implement the embeddings API.
pub struct OpenAIEmbedder {
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
    client: Client,
}

impl OpenAIEmbedder {
    /// Creates a new client.
    ///
    /// # Arguments
    /// * `base_url` - The API base URL (e.g., "https://api.openai.com/v1")
    /// * `api_key` - The API key (can be empty for local providers like Ollama)
    /// * `model` - The model name (e.g., "text-embedding-3-small")
    /// * `dimension` - Expected vector length
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            dimension,
            client: Client::new(),
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, KnowledgeError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| KnowledgeError::Configuration(format!("HTTP client: {}", e)))?;

        let mut embedder = Self::new(
            config.base_url_or_default(),
            config.api_key_or_env().unwrap_or_default(),
            config.model_or_default(),
            config.dimensions,
        );
        embedder.client = client;
        Ok(embedder)
    }

    /// Only the text-embedding-3 family accepts a requested dimension.
    fn requested_dimensions(&self) -> Option<usize> {
        self.model
            .starts_with("text-embedding-3")
            .then_some(self.dimension)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// 429 and 5xx are worth retrying; other failures are not.
fn classify_status(status: StatusCode, body: String) -> KnowledgeError {
    let message = format!("provider returned {}: {}", status.as_u16(), body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        KnowledgeError::retryable_embedding(message)
    } else {
        KnowledgeError::terminal_embedding(message)
    }
}

fn classify_transport(err: reqwest::Error) -> KnowledgeError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        KnowledgeError::retryable_embedding(err.to_string())
    } else {
        KnowledgeError::terminal_embedding(err.to_string())
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KnowledgeError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.requested_dimensions(),
        };
        let url = format!("{}/embeddings", self.base_url);

        let mut req = self.client.post(&url).header("content-type", "application/json");

        // Only add authorization if api_key is not empty
        if !self.api_key.is_empty() {
            req = req.header("authorization", format!("Bearer {}", self.api_key));
        }

        let response = req.json(&request).send().await.map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| KnowledgeError::terminal_embedding(format!("invalid response: {}", e)))?;

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_trailing_slash_removed() {
        let embedder = OpenAIEmbedder::new("http://localhost:11434/v1/", "", "nomic-embed-text", 768);
        assert_eq!(embedder.base_url, "http://localhost:11434/v1");
        assert_eq!(embedder.model_name(), "nomic-embed-text");
        assert_eq!(embedder.requested_dimensions(), None);
    }

    #[test]
    fn test_dimensions_requested_for_v3_models() {
        let embedder = OpenAIEmbedder::new("https://api.openai.com/v1", "k", "text-embedding-3-small", 512);
        assert_eq!(embedder.requested_dimensions(), Some(512));
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, String::new()).is_retryable());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, String::new()).is_retryable());
        assert!(!classify_status(StatusCode::BAD_REQUEST, String::new()).is_retryable());
    }

    #[test]
    fn test_request_shape() {
        let input = vec!["a".to_string()];
        let body = serde_json::to_value(EmbeddingRequest {
            model: "m",
            input: &input,
            dimensions: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"model": "m", "input": ["a"]}));
    }
}
