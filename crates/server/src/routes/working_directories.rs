// crates/server/src/routes/working_directories.rs
//! GET /working-directories: project directories seen in the history.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use claude_relay_core::WorkingDirectoriesResponse;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/working-directories", get(list_working_directories))
}

pub async fn list_working_directories(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<WorkingDirectoriesResponse>> {
    let response = state.history.working_directories().await?;
    tracing::debug!(directories = response.total_count, "Listed working directories");
    Ok(Json(response))
}
