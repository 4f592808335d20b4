pub mod health;
pub mod sessions;
pub mod turn;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::state::AppState;

/// Request bodies are single chat turns or evaluation payloads
const MAX_BODY_BYTES: usize = 64 * 1024;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/stats", get(health::stats_handler))
        .route("/api/turn", post(turn::turn_handler))
        .route("/api/sessions/{id}/complete", post(sessions::complete_handler))
        .route("/api/sessions/{id}/cancel", post(sessions::cancel_handler))
        .route("/api/sessions/{id}/evaluation", post(sessions::evaluation_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
