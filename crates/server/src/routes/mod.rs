//! API route handlers for the relay server.

pub mod conversations;
pub mod health;
pub mod stream;
pub mod system;
pub mod working_directories;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET  /api/health - Health check
/// - GET  /api/conversations - List conversations with filter/sort/pagination
/// - GET  /api/conversations/{session_id} - Conversation messages and metadata
/// - GET  /api/stream/{streaming_id} - SSE stream of a running conversation
/// - GET  /api/system/cache - File cache statistics
/// - POST /api/system/cache/clear - Clear the file cache
/// - GET  /api/system/status - Active sessions and stream observers
/// - GET  /api/working-directories - Project directories with short names
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", conversations::router())
        .nest("/api", stream::router())
        .nest("/api", system::router())
        .nest("/api", working_directories::router())
        .with_state(state)
}
