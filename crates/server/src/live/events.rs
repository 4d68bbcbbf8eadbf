//! Events pushed to stream observers.
//!
//! Control events are produced by the relay itself. Process messages come
//! from the supervised CLI's JSON stream and are passed through untouched,
//! apart from being checked for a known `type` and a `session_id`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of message emitted by the supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessMessageKind {
    System,
    Assistant,
    User,
    Result,
}

/// One message of the supervised process's output stream.
///
/// Every field other than `type` and `session_id` is kept as-is in `body`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessMessage {
    #[serde(rename = "type")]
    pub kind: ProcessMessageKind,
    pub session_id: String,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl ProcessMessage {
    pub fn new(kind: ProcessMessageKind, session_id: impl Into<String>) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            body: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.body.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Pending,
    Approved,
    Denied,
}

/// Tool permission prompt raised by the supervised process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    pub id: String,
    pub streaming_id: String,
    pub tool_name: String,
    pub tool_input: Map<String, Value>,
    pub timestamp: String,
    pub status: PermissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_input: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny_reason: Option<String>,
}

/// Events generated by the relay.
///
/// `connected` spells its id `streaming_id`; the others use `streamingId`.
/// Clients depend on both spellings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    Connected {
        streaming_id: String,
        timestamp: String,
    },
    PermissionRequest {
        data: PermissionRequest,
        #[serde(rename = "streamingId")]
        streaming_id: String,
        timestamp: String,
    },
    Error {
        error: String,
        #[serde(rename = "streamingId")]
        streaming_id: String,
        timestamp: String,
    },
    Closed {
        #[serde(rename = "streamingId")]
        streaming_id: String,
        timestamp: String,
    },
}

/// Anything delivered on a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Control(ControlEvent),
    Process(ProcessMessage),
}

impl StreamEvent {
    pub fn connected(streaming_id: &str) -> Self {
        Self::Control(ControlEvent::Connected {
            streaming_id: streaming_id.to_string(),
            timestamp: now(),
        })
    }

    pub fn permission_request(streaming_id: &str, data: PermissionRequest) -> Self {
        Self::Control(ControlEvent::PermissionRequest {
            data,
            streaming_id: streaming_id.to_string(),
            timestamp: now(),
        })
    }

    pub fn error(streaming_id: &str, error: impl Into<String>) -> Self {
        Self::Control(ControlEvent::Error {
            error: error.into(),
            streaming_id: streaming_id.to_string(),
            timestamp: now(),
        })
    }

    pub fn closed(streaming_id: &str) -> Self {
        Self::Control(ControlEvent::Closed {
            streaming_id: streaming_id.to_string(),
            timestamp: now(),
        })
    }

    /// Wire `type` of the event, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Control(ControlEvent::Connected { .. }) => "connected",
            Self::Control(ControlEvent::PermissionRequest { .. }) => "permission_request",
            Self::Control(ControlEvent::Error { .. }) => "error",
            Self::Control(ControlEvent::Closed { .. }) => "closed",
            Self::Process(m) => match m.kind {
                ProcessMessageKind::System => "system",
                ProcessMessageKind::Assistant => "assistant",
                ProcessMessageKind::User => "user",
                ProcessMessageKind::Result => "result",
            },
        }
    }
}

impl From<ProcessMessage> for StreamEvent {
    fn from(message: ProcessMessage) -> Self {
        Self::Process(message)
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
