// crates/server/src/routes/stream.rs
//! Server-sent event stream of one running conversation.
//!
//! - GET /stream/{streaming_id}
//!
//! Every event is a `data:` line of JSON: the relay's own `connected`,
//! `permission_request`, `error` and `closed` events, or a message of the
//! underlying process passed through as-is. Heartbeats are SSE comments.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
    Router,
};

use crate::live::hub::{HubMessage, SinkId, StreamHub, StreamSink};
use crate::state::AppState;

/// Unsubscribes the observer when the response stream is dropped, whether
/// the client hung up or the stream was closed.
struct ObserverGuard {
    streaming_id: String,
    sink_id: SinkId,
    hub: Arc<StreamHub>,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.hub.remove_client(&self.streaming_id, self.sink_id);
        tracing::debug!(
            streaming_id = %self.streaming_id,
            sink_id = self.sink_id,
            "ObserverGuard dropped, observer removed"
        );
    }
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/stream/{streaming_id}", get(stream_events))
}

/// GET /api/stream/{streaming_id} - Subscribe to a conversation's events.
pub async fn stream_events(
    State(state): State<Arc<AppState>>,
    Path(streaming_id): Path<String>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let (sink, mut rx) = StreamSink::channel();
    let guard = ObserverGuard {
        streaming_id: streaming_id.clone(),
        sink_id: sink.id(),
        hub: state.hub.clone(),
    };
    state.hub.add_client(&streaming_id, sink);

    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(message) = rx.recv().await {
            match message {
                HubMessage::Event(event) => match serde_json::to_string(&event) {
                    Ok(data) => {
                        yield Ok(Event::default().data(data));
                    }
                    Err(e) => tracing::warn!(
                        streaming_id = %streaming_id,
                        error = %e,
                        "Failed to serialize stream event"
                    ),
                },
                HubMessage::Heartbeat => {
                    yield Ok(Event::default().comment("heartbeat"));
                }
            }
        }
    };

    Sse::new(stream)
}
