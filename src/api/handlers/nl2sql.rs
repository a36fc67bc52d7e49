use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::{NaturalLanguageQueryRequest, ValidateSqlRequest, ValidateSqlResponse};
use crate::services::Nl2SqlService;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Nl2SqlService>,
}

/// Generate SQL for a natural-language question
pub async fn generate_sql(
    State(state): State<AppState>,
    Json(payload): Json<NaturalLanguageQueryRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!("Received natural language query: {}", payload.question);

    if payload.question.trim().is_empty() {
        return Err(AppError::Validation("Question cannot be empty".to_string()));
    }

    let result = state.service.run(&payload).await?;

    Ok(Json(serde_json::json!({
        "query": result,
    })))
}

/// Validate caller-supplied SQL against the schema
pub async fn validate_sql(
    State(state): State<AppState>,
    Json(payload): Json<ValidateSqlRequest>,
) -> Result<Json<ValidateSqlResponse>, AppError> {
    let sql = payload.sql.trim();
    if sql.is_empty() {
        return Err(AppError::Validation("SQL query cannot be empty".to_string()));
    }

    Ok(Json(state.service.validate(sql, payload.schema.as_deref())))
}

/// Default schema as used in generation prompts
pub async fn get_schema(State(state): State<AppState>) -> Json<serde_json::Value> {
    let store = state.service.schema_store();
    let schema = store.default_schema();

    Json(serde_json::json!({
        "format": schema.format,
        "source": store.source().map(|p| p.display().to_string()),
        "table_count": schema.len(),
        "schema": schema.to_prompt_value(),
    }))
}

/// Look up a stored analysis by query key
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let analysis = state
        .service
        .store()
        .get(&key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Analysis {} not found", key)))?;

    Ok(Json(serde_json::json!({
        "analysis": analysis,
    })))
}

/// Analyses recorded for a session, newest first
pub async fn list_session_analyses(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let analyses = state.service.session_analyses(&session_id).await?;

    Ok(Json(serde_json::json!({
        "session_id": session_id,
        "count": analyses.len(),
        "analyses": analyses,
    })))
}
