//! Consumer of the process supervisor's event feed.
//!
//! The supervisor owns the CLI processes. It reports what they do as
//! [`FeedEvent`]s; this module turns those into registry transitions and
//! stream broadcasts.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::events::{PermissionRequest, ProcessMessage, ProcessMessageKind, StreamEvent};
use super::hub::StreamHub;
use super::registry::{SessionContext, SessionRegistry};

/// Capacity of the supervisor -> relay channel.
pub const FEED_BUFFER: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A process was started for `streaming_id`. Its Claude session id is not
    /// known until the process emits its `system` message.
    Spawned {
        streaming_id: String,
        context: SessionContext,
    },
    Message {
        streaming_id: String,
        message: ProcessMessage,
    },
    PermissionRequest {
        streaming_id: String,
        request: PermissionRequest,
    },
    Error {
        streaming_id: String,
        error: String,
    },
    Closed {
        streaming_id: String,
    },
}

pub struct FeedConsumer {
    registry: Arc<SessionRegistry>,
    hub: Arc<StreamHub>,
    /// Contexts of spawned streams waiting for their session id.
    pending: HashMap<String, SessionContext>,
}

impl FeedConsumer {
    pub fn new(registry: Arc<SessionRegistry>, hub: Arc<StreamHub>) -> Self {
        Self {
            registry,
            hub,
            pending: HashMap::new(),
        }
    }

    pub fn handle(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Spawned {
                streaming_id,
                context,
            } => {
                tracing::debug!(streaming_id = %streaming_id, "Process spawned");
                self.pending.insert(streaming_id, context);
            }
            FeedEvent::Message {
                streaming_id,
                message,
            } => {
                match message.kind {
                    ProcessMessageKind::System => self.register_if_new(&streaming_id, &message.session_id),
                    ProcessMessageKind::Assistant => {
                        if let Some(payload) = message.body.get("message") {
                            self.registry.record_assistant_message(&message.session_id, payload);
                        }
                    }
                    ProcessMessageKind::User | ProcessMessageKind::Result => {}
                }
                self.hub.broadcast(&streaming_id, &StreamEvent::from(message));
            }
            FeedEvent::PermissionRequest {
                streaming_id,
                request,
            } => {
                tracing::info!(
                    streaming_id = %streaming_id,
                    tool = %request.tool_name,
                    "Permission requested"
                );
                self.hub
                    .broadcast(&streaming_id, &StreamEvent::permission_request(&streaming_id, request));
            }
            FeedEvent::Error {
                streaming_id,
                error,
            } => {
                tracing::warn!(streaming_id = %streaming_id, error = %error, "Process reported an error");
                self.hub.broadcast(&streaming_id, &StreamEvent::error(&streaming_id, error));
            }
            FeedEvent::Closed { streaming_id } => {
                self.pending.remove(&streaming_id);
                self.registry.unregister_active_session(&streaming_id);
                self.hub.close_session(&streaming_id);
            }
        }
    }

    fn register_if_new(&mut self, streaming_id: &str, session_id: &str) {
        if session_id.is_empty() {
            tracing::debug!(streaming_id, "System message without session id");
            return;
        }
        if self.registry.session_id_for(streaming_id).as_deref() == Some(session_id) {
            return;
        }
        let context = self.pending.remove(streaming_id);
        self.registry
            .register_active_session(streaming_id, session_id, context);
    }

    /// Drain `rx` until every sender is dropped.
    pub async fn run(mut self, mut rx: mpsc::Receiver<FeedEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle(event);
        }
        tracing::info!("Process feed closed");
    }
}

/// Start a consumer task and return the sender the supervisor writes to.
pub fn spawn_feed_consumer(
    registry: Arc<SessionRegistry>,
    hub: Arc<StreamHub>,
) -> (mpsc::Sender<FeedEvent>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(FEED_BUFFER);
    let handle = tokio::spawn(FeedConsumer::new(registry, hub).run(rx));
    (tx, handle)
}
