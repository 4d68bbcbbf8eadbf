// crates/core/src/session_info.rs
//! Read-only view of the per-session metadata store.
//!
//! Pinned/archived flags and custom names live outside the JSONL log. The
//! history reader only ever looks them up by session id.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// User-managed metadata attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub custom_name: String,
    pub created_at: String,
    pub updated_at: String,
    pub version: u32,
    pub pinned: bool,
    pub archived: bool,
    pub continuation_session_id: String,
    pub initial_commit_head: String,
    pub permission_mode: String,
}

impl SessionInfo {
    /// Defaults used for sessions the store has never seen.
    pub fn fresh(timestamp: impl Into<String>) -> Self {
        let timestamp = timestamp.into();
        Self {
            custom_name: String::new(),
            created_at: timestamp.clone(),
            updated_at: timestamp,
            version: 4,
            pinned: false,
            archived: false,
            continuation_session_id: String::new(),
            initial_commit_head: String::new(),
            permission_mode: "default".to_string(),
        }
    }
}

/// Lookup of session metadata by session id.
pub trait SessionInfoStore: Send + Sync {
    fn session_info(&self, session_id: &str) -> Option<SessionInfo>;
}

/// In-process store, used when no persistent backend is configured.
#[derive(Default)]
pub struct InMemorySessionInfoStore {
    sessions: RwLock<HashMap<String, SessionInfo>>,
}

impl InMemorySessionInfoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session_id: impl Into<String>, info: SessionInfo) {
        self.sessions
            .write()
            .expect("RwLock poisoned")
            .insert(session_id.into(), info);
    }
}

impl SessionInfoStore for InMemorySessionInfoStore {
    fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions
            .read()
            .expect("RwLock poisoned")
            .get(session_id)
            .cloned()
    }
}
