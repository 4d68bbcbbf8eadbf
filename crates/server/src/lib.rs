// crates/server/src/lib.rs
//! claude-relay server library.
//!
//! Serves stored Claude Code conversation history and relays the event
//! streams of running conversations to any number of observers.

pub mod config;
pub mod error;
pub mod live;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::*;
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, conversations, stream, system, working directories)
/// - CORS for development (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
