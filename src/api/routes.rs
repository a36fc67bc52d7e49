use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::nl2sql::{self, AppState};
use crate::services::Nl2SqlService;

/// Create router with application state
pub fn create_router_with_state(service: Arc<Nl2SqlService>) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/nl2sql/query", post(nl2sql::generate_sql))
        .route("/api/nl2sql/validate", post(nl2sql::validate_sql))
        .route("/api/nl2sql/schema", get(nl2sql::get_schema))
        .route("/api/nl2sql/analyses/{key}", get(nl2sql::get_analysis))
        .route(
            "/api/nl2sql/sessions/{session_id}/analyses",
            get(nl2sql::list_session_analyses),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
