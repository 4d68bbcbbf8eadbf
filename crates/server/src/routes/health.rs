// crates/server/src/routes/health.rs
//! Liveness check with a one-line summary of relay load.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub active_sessions: usize,
    pub stream_observers: usize,
    pub history_loaded: bool,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}

/// GET /api/health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime_secs(),
        active_sessions: state.registry.stats().active_sessions_count,
        stream_observers: state.hub.total_client_count(),
        history_loaded: state.history.cache().stats().is_loaded,
    })
}
