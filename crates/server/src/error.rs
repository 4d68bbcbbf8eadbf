// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use claude_relay_core::{DiscoveryError, RefreshError};
use serde::Serialize;
use thiserror::Error;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("History refresh failed: {0}")]
    Refresh(#[from] RefreshError),
}

fn discovery_message(err: &DiscoveryError) -> &'static str {
    match err {
        DiscoveryError::PermissionDenied { path } => {
            tracing::error!(path = %path.display(), "Permission denied accessing projects");
            "Cannot access Claude projects directory"
        }
        DiscoveryError::Io { path, source } => {
            tracing::error!(path = %path.display(), error = %source, "IO error during discovery");
            "IO error accessing projects"
        }
        DiscoveryError::HomeDirNotFound => {
            tracing::error!("Home directory not found");
            "Home directory not found"
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::ConversationNotFound(id) => {
                tracing::debug!(session_id = %id, "Conversation not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Conversation not found", format!("Session ID: {}", id)),
                )
            }
            ApiError::Refresh(RefreshError::Listing(discovery_err)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::with_details(discovery_message(discovery_err), discovery_err.to_string()),
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
