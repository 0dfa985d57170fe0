use axum::extract::State;
use axum::{Json, Router, routing::get};
use chrono::SecondsFormat;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub sessions: usize,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Liveness plus the number of active MCP sessions.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        sessions: state.sessions.len(),
    })
}
