use std::time::Duration;
use thiserror::Error;

/// Errors produced by the NL-to-SQL pipeline.
///
/// Only `SchemaUnavailable`, `MissingContext` and `EmbeddingUnavailable` are
/// raised by the core stages. Recoverable conditions (ambiguous
/// classification, empty table selection, failed validation) are reported as
/// [`crate::models::PipelineNotice`] values instead.
#[derive(Debug, Error)]
pub enum Nl2SqlError {
    #[error("Schema unavailable: {0}")]
    SchemaUnavailable(String),

    #[error("Missing context: {0}")]
    MissingContext(String),

    #[error("Embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("LLM service error: {0}")]
    LlmService(String),

    #[error("Vector index error: {0}")]
    VectorIndex(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Pipeline timed out after {0:?}")]
    Timeout(Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Nl2SqlError {
    /// Whether a caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Nl2SqlError::Timeout(_)
                | Nl2SqlError::LlmService(_)
                | Nl2SqlError::EmbeddingUnavailable(_)
        )
    }
}

impl From<rusqlite::Error> for Nl2SqlError {
    fn from(err: rusqlite::Error) -> Self {
        Nl2SqlError::Storage(err.to_string())
    }
}

impl From<anyhow::Error> for Nl2SqlError {
    fn from(err: anyhow::Error) -> Self {
        Nl2SqlError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Nl2SqlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Nl2SqlError::Timeout(Duration::from_secs(60)).is_retryable());
        assert!(Nl2SqlError::EmbeddingUnavailable("down".into()).is_retryable());
        assert!(!Nl2SqlError::MissingContext("no examples".into()).is_retryable());
        assert!(!Nl2SqlError::SchemaUnavailable("missing".into()).is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = Nl2SqlError::MissingContext("schema is empty".to_string());
        assert_eq!(err.to_string(), "Missing context: schema is empty");

        let err = Nl2SqlError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "Pipeline timed out after 250ms");
    }
}
