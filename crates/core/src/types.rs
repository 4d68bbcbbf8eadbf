// crates/core/src/types.rs
use serde::{Deserialize, Serialize};

use crate::session_info::SessionInfo;
use crate::tool_metrics::ToolMetrics;

/// Record type as written in the `type` field of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    User,
    Assistant,
    System,
    Summary,
}

impl EntryType {
    /// Parse the on-disk `type` value. Unknown record types return `None`.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            "summary" => Some(Self::Summary),
            _ => None,
        }
    }
}

/// One physical record from a Claude JSONL log file.
///
/// Summary records only carry `summary` and `leaf_uuid`; conversation records
/// carry everything else. `source_project` is derived from the file path by
/// the cache and is never read from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_uuid: Option<String>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub is_sidechain: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf_uuid: Option<String>,
    #[serde(default, skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub source_project: Option<String>,
}

impl LogEntry {
    /// Build a conversation record. Used for synthesized messages and tests.
    pub fn message(
        entry_type: EntryType,
        uuid: impl Into<String>,
        session_id: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            entry_type,
            uuid: uuid.into(),
            session_id: session_id.into(),
            parent_uuid: None,
            timestamp: timestamp.into(),
            message: None,
            cwd: None,
            duration_ms: None,
            is_sidechain: false,
            user_type: None,
            version: None,
            summary: None,
            leaf_uuid: None,
            source_project: None,
        }
    }

    pub fn with_parent(mut self, parent_uuid: impl Into<String>) -> Self {
        self.parent_uuid = Some(parent_uuid.into());
        self
    }

    pub fn with_payload(mut self, message: serde_json::Value) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn sidechain(mut self) -> Self {
        self.is_sidechain = true;
        self
    }

    /// Whether this record is a conversation message (not a summary).
    pub fn is_message(&self) -> bool {
        self.entry_type != EntryType::Summary
    }

    /// Model name carried by the payload (`message.model`), if any.
    pub fn model(&self) -> Option<&str> {
        self.message
            .as_ref()
            .and_then(|m| m.get("model"))
            .and_then(|m| m.as_str())
            .filter(|m| !m.is_empty())
    }

    /// First text content of the payload.
    ///
    /// Handles both shapes Claude writes: `content` as a plain string, or as
    /// an array of content blocks where the first `text` block wins.
    pub fn text_content(&self) -> Option<&str> {
        let message = self.message.as_ref()?;
        if let Some(s) = message.as_str() {
            return Some(s);
        }
        match message.get("content")? {
            serde_json::Value::String(s) => Some(s.as_str()),
            serde_json::Value::Array(blocks) => blocks
                .iter()
                .find(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .and_then(|b| b.get("text"))
                .and_then(|t| t.as_str()),
            _ => None,
        }
    }
}

/// A session's messages resolved into root-to-leaf order.
///
/// Derived from the log on every query; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationChain {
    pub session_id: String,
    pub messages: Vec<LogEntry>,
    pub project_path: String,
    pub summary: String,
    pub created_at: String,
    pub updated_at: String,
    pub total_duration_ms: u64,
    pub model: String,
    /// True when the parent links were unusable and timestamp order was used.
    pub degraded: bool,
}

/// Lifecycle status reported alongside a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Completed,
    Ongoing,
    Pending,
}

/// Conversation list item returned by history queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub session_id: String,
    pub project_path: String,
    pub summary: String,
    pub session_info: SessionInfo,
    pub created_at: String,
    pub updated_at: String,
    pub message_count: usize,
    pub total_duration: u64,
    pub model: String,
    pub status: ConversationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_metrics: Option<ToolMetrics>,
}

/// Aggregate metadata attached to conversation details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMetadata {
    pub total_duration: u64,
    pub model: String,
}

/// Full message view of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetails {
    pub messages: Vec<LogEntry>,
    pub summary: String,
    pub project_path: String,
    pub metadata: ConversationMetadata,
}
