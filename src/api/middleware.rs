use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Nl2SqlError;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Pipeline(#[from] Nl2SqlError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default)]
    pub retryable: bool,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

fn pipeline_error(err: Nl2SqlError) -> (StatusCode, ErrorDetail) {
    let retryable = err.is_retryable();
    let message = err.to_string();
    let (status, detail) = match err {
        Nl2SqlError::SchemaUnavailable(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorDetail::new("SCHEMA_UNAVAILABLE", message)
                .with_details("Check that the configured schema file exists and parses."),
        ),
        Nl2SqlError::MissingContext(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorDetail::new("MISSING_CONTEXT", message),
        ),
        Nl2SqlError::EmbeddingUnavailable(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorDetail::new("EMBEDDING_UNAVAILABLE", message),
        ),
        Nl2SqlError::LlmService(msg) => {
            let detail = ErrorDetail::new("LLM_SERVICE_ERROR", message);
            let detail = if msg.contains("not configured") {
                detail.with_details(
                    "Please configure LLM_GATEWAY_URL environment variable to use natural language queries.",
                )
            } else {
                detail
            };
            (StatusCode::BAD_GATEWAY, detail)
        }
        Nl2SqlError::InvalidRequest(_) => (
            StatusCode::BAD_REQUEST,
            ErrorDetail::new("INVALID_REQUEST", message),
        ),
        Nl2SqlError::Timeout(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            ErrorDetail::new("TIMEOUT", message),
        ),
        Nl2SqlError::VectorIndex(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetail::new("VECTOR_INDEX_ERROR", message),
        ),
        Nl2SqlError::Storage(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetail::new("STORAGE_ERROR", message),
        ),
        Nl2SqlError::Internal(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetail::new("INTERNAL_ERROR", message),
        ),
    };
    (status, detail.retryable(retryable))
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match self {
            AppError::Pipeline(err) => pipeline_error(err),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("VALIDATION_ERROR", msg),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorDetail::new("NOT_FOUND", msg)),
        };

        if status.is_server_error() {
            tracing::error!("{}: {}", error_detail.code, error_detail.message);
        }

        let body = Json(ErrorResponse {
            error: error_detail,
        });

        (status, body).into_response()
    }
}
