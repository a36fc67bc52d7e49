use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Nl2SqlError, Result};

/// Text embedding provider. Index build and query must use the same
/// provider so vector dimensions agree.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

/// Embedding client talking to an HTTP embedding gateway
pub struct GatewayEmbedder {
    url: String,
    api_key: Option<String>,
    model: String,
    http_client: HttpClient,
}

impl GatewayEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                Nl2SqlError::EmbeddingUnavailable(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            http_client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for GatewayEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.url.is_empty() {
            return Err(Nl2SqlError::EmbeddingUnavailable(
                "Embedding service is not configured".to_string(),
            ));
        }

        let mut request = self.http_client.post(&self.url).json(&EmbeddingRequest {
            model: &self.model,
            input: text,
        });
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request.send().await.map_err(|e| {
            Nl2SqlError::EmbeddingUnavailable(format!("Failed to call embedding service: {}", e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Nl2SqlError::EmbeddingUnavailable(format!(
                "Embedding service returned error {}: {}",
                status, error_text
            )));
        }

        let result: Value = response.json().await.map_err(|e| {
            Nl2SqlError::EmbeddingUnavailable(format!("Failed to parse embedding response: {}", e))
        })?;

        extract_embedding(&result).ok_or_else(|| {
            Nl2SqlError::EmbeddingUnavailable(
                "Embedding response does not contain a vector".to_string(),
            )
        })
    }
}

/// Pull the vector out of `embedding`, `data[0].embedding` or `embeddings[0]`
pub fn extract_embedding(result: &Value) -> Option<Vec<f32>> {
    let raw = [
        &result["embedding"],
        &result["data"][0]["embedding"],
        &result["embeddings"][0],
    ]
    .into_iter()
    .find_map(Value::as_array)?;

    let vector: Option<Vec<f32>> = raw.iter().map(|v| v.as_f64().map(|f| f as f32)).collect();
    vector.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_embedding_formats() {
        assert_eq!(
            extract_embedding(&json!({"embedding": [0.5, 1.0]})),
            Some(vec![0.5, 1.0])
        );
        assert_eq!(
            extract_embedding(&json!({"data": [{"embedding": [1, 2, 3]}]})),
            Some(vec![1.0, 2.0, 3.0])
        );
        assert_eq!(
            extract_embedding(&json!({"embeddings": [[0.25]]})),
            Some(vec![0.25])
        );
    }

    #[test]
    fn test_extract_embedding_rejects_bad_payloads() {
        assert_eq!(extract_embedding(&json!({"embedding": []})), None);
        assert_eq!(extract_embedding(&json!({"embedding": ["x"]})), None);
        assert_eq!(extract_embedding(&json!({"vector": [1.0]})), None);
    }

    #[tokio::test]
    async fn test_unconfigured_service_is_unavailable() {
        let config = EmbeddingConfig {
            url: String::new(),
            api_key: None,
            model: "text-embedding-ada-002".to_string(),
            timeout_secs: 5,
        };
        let embedder = GatewayEmbedder::new(&config).unwrap();
        let err = embedder.embed("users").await.unwrap_err();
        assert!(matches!(err, Nl2SqlError::EmbeddingUnavailable(_)));
    }
}
