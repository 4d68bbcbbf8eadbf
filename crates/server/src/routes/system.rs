// crates/server/src/routes/system.rs
//! Cache and live-state monitoring endpoints.
//!
//! - GET  /system/cache        — File cache statistics
//! - POST /system/cache/clear  — Drop every cached file record
//! - GET  /system/status       — Active conversations and stream observers

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use claude_relay_core::CacheStats;
use serde::Serialize;

use crate::live::registry::RegistryStats;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearCacheResponse {
    pub success: bool,
    pub cleared_files: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub streaming_id: String,
    pub clients: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatusResponse {
    pub version: String,
    pub uptime_secs: u64,
    pub registry: RegistryStats,
    pub streams: Vec<StreamInfo>,
    pub total_clients: usize,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/system/cache", get(cache_stats))
        .route("/system/cache/clear", post(clear_cache))
        .route("/system/status", get(system_status))
}

/// GET /api/system/cache
pub async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    Json(state.history.cache().stats())
}

/// POST /api/system/cache/clear
pub async fn clear_cache(State(state): State<Arc<AppState>>) -> Json<ClearCacheResponse> {
    let cleared_files = state.history.cache().stats().cached_file_count;
    state.history.clear_cache();
    Json(ClearCacheResponse {
        success: true,
        cleared_files,
    })
}

/// GET /api/system/status
pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatusResponse> {
    let streams: Vec<StreamInfo> = state
        .hub
        .active_streams()
        .into_iter()
        .map(|streaming_id| StreamInfo {
            clients: state.hub.client_count(&streaming_id),
            streaming_id,
        })
        .collect();

    Json(SystemStatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        registry: state.registry.stats(),
        total_clients: streams.iter().map(|s| s.clients).sum(),
        streams,
    })
}
