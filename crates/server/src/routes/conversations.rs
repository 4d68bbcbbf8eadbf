// crates/server/src/routes/conversations.rs
//! Conversation history endpoints.
//!
//! - GET /conversations               — Stored conversations merged with live ones
//! - GET /conversations/{session_id}  — Messages of one conversation

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use claude_relay_core::{ConversationDetails, ConversationListQuery, ConversationPage};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/conversations", get(list_conversations))
        .route("/conversations/{session_id}", get(get_conversation))
}

/// GET /api/conversations - Filtered, sorted, paginated conversation list.
///
/// Sessions that are running but not yet in the log appear as `ongoing`
/// entries with a `streamingId`.
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConversationListQuery>,
) -> ApiResult<Json<ConversationPage>> {
    let page = state
        .history
        .list_conversations(&query, state.registry.as_ref())
        .await?;
    tracing::debug!(
        returned = page.conversations.len(),
        total = page.total,
        "Listed conversations"
    );
    Ok(Json(page))
}

/// GET /api/conversations/{session_id} - Full conversation.
///
/// Falls back to the provisional view of a live session that has not been
/// flushed to the log yet.
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<ConversationDetails>> {
    if let Some(details) = state.history.conversation_details(&session_id).await? {
        return Ok(Json(details));
    }
    state
        .registry
        .active_conversation_details(&session_id)
        .map(Json)
        .ok_or(ApiError::ConversationNotFound(session_id))
}
