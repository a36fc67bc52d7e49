use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{Nl2SqlError, Result};

/// Text completion provider
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
}

/// LLM client talking to an HTTP completion gateway
pub struct GatewayLlm {
    gateway_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    http_client: HttpClient,
}

impl GatewayLlm {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Self::with_model(config, &config.model)
    }

    /// Same gateway, different model (used for the complex generation path)
    pub fn with_model(config: &LlmConfig, model: &str) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Nl2SqlError::LlmService(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            gateway_url: config.gateway_url.clone(),
            api_key: config.api_key.clone(),
            model: model.to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            http_client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LanguageModel for GatewayLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if self.gateway_url.is_empty() {
            return Err(Nl2SqlError::LlmService(
                "LLM gateway is not configured".to_string(),
            ));
        }

        tracing::debug!("Sending completion request to {} (model {})", self.gateway_url, self.model);

        let mut request = self.http_client.post(&self.gateway_url).json(&CompletionRequest {
            model: &self.model,
            prompt,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        });

        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Nl2SqlError::LlmService(format!("Failed to call LLM service: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Nl2SqlError::LlmService(format!(
                "LLM service returned error {}: {}",
                status, error_text
            )));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| Nl2SqlError::LlmService(format!("Failed to parse LLM response: {}", e)))?;

        let text = extract_completion_text(&result).ok_or_else(|| {
            Nl2SqlError::LlmService("LLM response does not contain any text".to_string())
        })?;
        tracing::debug!("Raw completion: {}", text);
        Ok(text.to_string())
    }
}

/// First textual completion in a gateway response.
///
/// Understands plain gateways (`text`, `content`, `response`) and
/// OpenAI-style `choices`.
pub fn extract_completion_text(result: &Value) -> Option<&str> {
    result["text"]
        .as_str()
        .or_else(|| result["content"].as_str())
        .or_else(|| result["response"].as_str())
        .or_else(|| result["choices"][0]["text"].as_str())
        .or_else(|| result["choices"][0]["message"]["content"].as_str())
}

/// Strip markdown fences and prompt echo from a completion, leaving the SQL
pub fn clean_sql(completion: &str) -> String {
    let mut text = completion.trim();

    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        // Skip a language tag on the opening fence
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let tag = after[..body_start].trim();
        let body = if tag.is_empty() || tag.chars().all(|c| c.is_ascii_alphabetic()) {
            &after[body_start..]
        } else {
            after
        };
        text = match body.find("```") {
            Some(end) => &body[..end],
            None => body,
        };
    }

    let text = text.trim();
    let text = text
        .strip_prefix("SQL Query:")
        .or_else(|| text.strip_prefix("SQL:"))
        .unwrap_or(text);
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_completion_text_formats() {
        assert_eq!(extract_completion_text(&json!({"text": "a"})), Some("a"));
        assert_eq!(extract_completion_text(&json!({"content": "b"})), Some("b"));
        assert_eq!(extract_completion_text(&json!({"response": "c"})), Some("c"));
        assert_eq!(
            extract_completion_text(&json!({"choices": [{"text": "d"}]})),
            Some("d")
        );
        assert_eq!(
            extract_completion_text(&json!({"choices": [{"message": {"role": "assistant", "content": "e"}}]})),
            Some("e")
        );
        assert_eq!(extract_completion_text(&json!({"other": 1})), None);
    }

    #[test]
    fn test_clean_sql_strips_fences() {
        assert_eq!(
            clean_sql("```sql\nSELECT *\nFROM users;\n```"),
            "SELECT *\nFROM users;"
        );
        assert_eq!(clean_sql("```\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(
            clean_sql("Here you go:\n```sql\nSELECT 1\n```\nHope it helps"),
            "SELECT 1"
        );
        assert_eq!(clean_sql("  SELECT 1  "), "SELECT 1");
        assert_eq!(clean_sql("SQL Query: SELECT 1"), "SELECT 1");
    }

    #[tokio::test]
    async fn test_unconfigured_gateway_fails() {
        let config = LlmConfig {
            gateway_url: String::new(),
            api_key: None,
            model: "gpt-4o".to_string(),
            complex_model: "gpt-4".to_string(),
            max_tokens: 500,
            temperature: 0.0,
            timeout_secs: 5,
        };
        let llm = GatewayLlm::new(&config).unwrap();
        let err = llm.complete("hello").await.unwrap_err();
        assert!(matches!(err, Nl2SqlError::LlmService(_)));
    }
}
