//! Fan-out of stream events to connected observers.
//!
//! Each streaming id has an ordered list of sinks. A sink is the sending half
//! of an unbounded channel whose receiver feeds one SSE response. A sink whose
//! receiver is gone fails on send and is dropped from its stream on the spot.
//!
//! While at least one observer is connected a heartbeat task pings every sink
//! so idle connections survive proxies. The task exits once the last observer
//! leaves and is started again by the next `add_client`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::events::StreamEvent;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub type SinkId = u64;

static NEXT_SINK_ID: AtomicU64 = AtomicU64::new(1);

/// What a sink receives.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Event(StreamEvent),
    Heartbeat,
}

/// Sending side of one observer connection.
#[derive(Debug, Clone)]
pub struct StreamSink {
    id: SinkId,
    tx: mpsc::UnboundedSender<HubMessage>,
}

impl StreamSink {
    /// New sink with a process-unique id, plus the receiver to drain it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HubMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = NEXT_SINK_ID.fetch_add(1, Ordering::Relaxed);
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> SinkId {
        self.id
    }

    fn send(&self, message: HubMessage) -> bool {
        self.tx.send(message).is_ok()
    }
}

#[derive(Default)]
struct HubState {
    streams: HashMap<String, Vec<StreamSink>>,
    heartbeat: Option<JoinHandle<()>>,
}

impl HubState {
    fn total_clients(&self) -> usize {
        self.streams.values().map(Vec::len).sum()
    }

    /// Abort the heartbeat task once nobody is listening.
    fn stop_heartbeat_if_idle(&mut self) {
        if self.total_clients() == 0 {
            if let Some(handle) = self.heartbeat.take() {
                handle.abort();
                tracing::debug!("Heartbeat stopped, no stream observers left");
            }
        }
    }
}

pub struct StreamHub {
    state: Arc<Mutex<HubState>>,
    heartbeat_interval: Duration,
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}

impl StreamHub {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
            heartbeat_interval,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().expect("stream hub lock poisoned")
    }

    /// Subscribe `sink` to `streaming_id` and greet it with `connected`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_client(&self, streaming_id: &str, sink: StreamSink) {
        if !sink.send(HubMessage::Event(StreamEvent::connected(streaming_id))) {
            tracing::debug!(streaming_id, sink_id = sink.id, "Observer gone before connect");
            return;
        }

        let mut state = self.lock();
        let sink_id = sink.id;
        let sinks = state.streams.entry(streaming_id.to_string()).or_default();
        if !sinks.iter().any(|s| s.id == sink_id) {
            sinks.push(sink);
        }
        let stream_clients = sinks.len();

        if state.heartbeat.is_none() {
            let task = run_heartbeat(Arc::clone(&self.state), self.heartbeat_interval);
            state.heartbeat = Some(tokio::spawn(task));
            tracing::debug!(interval_secs = self.heartbeat_interval.as_secs(), "Heartbeat started");
        }

        tracing::info!(
            streaming_id,
            sink_id,
            stream_clients,
            total_clients = state.total_clients(),
            "Stream observer connected"
        );
    }

    /// Unsubscribe one sink. Unknown stream or sink ids are ignored.
    pub fn remove_client(&self, streaming_id: &str, sink_id: SinkId) {
        let mut state = self.lock();
        let Some(sinks) = state.streams.get_mut(streaming_id) else {
            return;
        };
        let before = sinks.len();
        sinks.retain(|s| s.id != sink_id);
        if sinks.len() == before {
            return;
        }
        if sinks.is_empty() {
            state.streams.remove(streaming_id);
        }
        state.stop_heartbeat_if_idle();
        tracing::info!(
            streaming_id,
            sink_id,
            total_clients = state.total_clients(),
            "Stream observer disconnected"
        );
    }

    /// Send `event` to every observer of `streaming_id`, in subscription order.
    ///
    /// Observers whose connection is gone are dropped; the rest are still
    /// served. Returns how many observers received the event.
    pub fn broadcast(&self, streaming_id: &str, event: &StreamEvent) -> usize {
        let mut state = self.lock();
        let Some(sinks) = state.streams.get_mut(streaming_id) else {
            tracing::debug!(streaming_id, kind = event.kind(), "No observers for stream");
            return 0;
        };

        let before = sinks.len();
        sinks.retain(|sink| sink.send(HubMessage::Event(event.clone())));
        let delivered = sinks.len();
        if delivered < before {
            tracing::debug!(
                streaming_id,
                dropped = before - delivered,
                "Dropped observers with closed connections"
            );
        }
        if sinks.is_empty() {
            state.streams.remove(streaming_id);
            state.stop_heartbeat_if_idle();
        }
        delivered
    }

    /// Tell every observer the stream is over, then drop them.
    pub fn close_session(&self, streaming_id: &str) {
        let mut state = self.lock();
        let Some(sinks) = state.streams.remove(streaming_id) else {
            return;
        };
        let closed = StreamEvent::closed(streaming_id);
        for sink in &sinks {
            sink.send(HubMessage::Event(closed.clone()));
        }
        state.stop_heartbeat_if_idle();
        tracing::info!(streaming_id, observers = sinks.len(), "Stream closed");
    }

    pub fn client_count(&self, streaming_id: &str) -> usize {
        self.lock().streams.get(streaming_id).map_or(0, Vec::len)
    }

    pub fn total_client_count(&self) -> usize {
        self.lock().total_clients()
    }

    pub fn active_streams(&self) -> Vec<String> {
        let mut streams: Vec<_> = self.lock().streams.keys().cloned().collect();
        streams.sort();
        streams
    }

    /// Drop every observer of every stream. Their channels end without a
    /// `closed` event.
    pub fn disconnect_all(&self) {
        let mut state = self.lock();
        let total = state.total_clients();
        state.streams.clear();
        state.stop_heartbeat_if_idle();
        tracing::info!(observers = total, "All stream observers disconnected");
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.lock().heartbeat.is_some()
    }
}

impl Drop for StreamHub {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(handle) = state.heartbeat.take() {
                handle.abort();
            }
        }
    }
}

async fn run_heartbeat(state: Arc<Mutex<HubState>>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let mut state = state.lock().expect("stream hub lock poisoned");
        state.streams.retain(|_, sinks| {
            sinks.retain(|sink| sink.send(HubMessage::Heartbeat));
            !sinks.is_empty()
        });
        if state.total_clients() == 0 {
            state.heartbeat = None;
            tracing::debug!("Heartbeat exiting, no stream observers left");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::events::{ControlEvent, ProcessMessage, ProcessMessageKind};

    fn message(text: &str) -> StreamEvent {
        ProcessMessage::new(ProcessMessageKind::Assistant, "s1")
            .with_field("text", serde_json::json!(text))
            .into()
    }

    fn expect_event(rx: &mut mpsc::UnboundedReceiver<HubMessage>) -> StreamEvent {
        match rx.try_recv().unwrap() {
            HubMessage::Event(event) => event,
            HubMessage::Heartbeat => panic!("expected event, got heartbeat"),
        }
    }

    #[tokio::test]
    async fn test_add_client_sends_connected() {
        let hub = StreamHub::default();
        let (sink, mut rx) = StreamSink::channel();
        hub.add_client("st-1", sink);

        match expect_event(&mut rx) {
            StreamEvent::Control(ControlEvent::Connected { streaming_id, .. }) => {
                assert_eq!(streaming_id, "st-1")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(hub.client_count("st-1"), 1);
        assert!(hub.is_heartbeat_running());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_in_order() {
        let hub = StreamHub::default();
        let (a, mut rx_a) = StreamSink::channel();
        let (b, mut rx_b) = StreamSink::channel();
        hub.add_client("st-1", a);
        hub.add_client("st-1", b);
        expect_event(&mut rx_a);
        expect_event(&mut rx_b);

        assert_eq!(hub.broadcast("st-1", &message("one")), 2);
        assert_eq!(hub.broadcast("st-1", &message("two")), 2);

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(expect_event(rx), message("one"));
            assert_eq!(expect_event(rx), message("two"));
        }
    }

    #[tokio::test]
    async fn test_failed_sink_is_dropped_others_still_served() {
        let hub = StreamHub::default();
        let (a, rx_a) = StreamSink::channel();
        let (b, mut rx_b) = StreamSink::channel();
        hub.add_client("st-1", a);
        hub.add_client("st-1", b);
        expect_event(&mut rx_b);
        drop(rx_a);

        assert_eq!(hub.broadcast("st-1", &message("hi")), 1);
        assert_eq!(expect_event(&mut rx_b), message("hi"));
        assert_eq!(hub.client_count("st-1"), 1);
    }

    #[tokio::test]
    async fn test_broadcast_to_unknown_stream_is_noop() {
        let hub = StreamHub::default();
        assert_eq!(hub.broadcast("missing", &message("hi")), 0);
        assert!(hub.active_streams().is_empty());
    }

    #[tokio::test]
    async fn test_close_session_sends_closed_then_ends_channels() {
        let hub = StreamHub::default();
        let (a, mut rx_a) = StreamSink::channel();
        let (b, mut rx_b) = StreamSink::channel();
        hub.add_client("st-1", a);
        hub.add_client("st-1", b);
        expect_event(&mut rx_a);
        expect_event(&mut rx_b);

        hub.close_session("st-1");

        for rx in [&mut rx_a, &mut rx_b] {
            assert!(matches!(
                expect_event(rx),
                StreamEvent::Control(ControlEvent::Closed { ref streaming_id, .. }) if streaming_id == "st-1"
            ));
            assert!(rx.recv().await.is_none(), "channel must end after closed");
        }
        assert_eq!(hub.client_count("st-1"), 0);
        assert!(hub.active_streams().is_empty());
        assert!(!hub.is_heartbeat_running());
    }

    #[tokio::test]
    async fn test_remove_client_and_unknown_ids() {
        let hub = StreamHub::default();
        let (a, _rx_a) = StreamSink::channel();
        let a_id = a.id();
        hub.add_client("st-1", a);

        hub.remove_client("st-1", 999_999);
        hub.remove_client("other", a_id);
        assert_eq!(hub.client_count("st-1"), 1);

        hub.remove_client("st-1", a_id);
        assert_eq!(hub.total_client_count(), 0);
        assert!(hub.active_streams().is_empty());
        assert!(!hub.is_heartbeat_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_ticks_and_restarts() {
        let hub = StreamHub::new(Duration::from_secs(30));
        let (a, mut rx_a) = StreamSink::channel();
        let a_id = a.id();
        hub.add_client("st-1", a);
        expect_event(&mut rx_a);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(rx_a.try_recv().unwrap(), HubMessage::Heartbeat);

        hub.remove_client("st-1", a_id);
        assert!(!hub.is_heartbeat_running());

        let (b, mut rx_b) = StreamSink::channel();
        hub.add_client("st-2", b);
        assert!(hub.is_heartbeat_running());
        expect_event(&mut rx_b);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(rx_b.try_recv().unwrap(), HubMessage::Heartbeat);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_exits_when_observers_vanish() {
        let hub = StreamHub::new(Duration::from_secs(5));
        let (a, rx_a) = StreamSink::channel();
        hub.add_client("st-1", a);
        drop(rx_a);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(hub.total_client_count(), 0);
        assert!(!hub.is_heartbeat_running());
    }

    #[tokio::test]
    async fn test_disconnect_all() {
        let hub = StreamHub::default();
        let (a, mut rx_a) = StreamSink::channel();
        let (b, _rx_b) = StreamSink::channel();
        hub.add_client("st-1", a);
        hub.add_client("st-2", b);
        assert_eq!(hub.total_client_count(), 2);
        assert_eq!(hub.active_streams(), vec!["st-1", "st-2"]);

        hub.disconnect_all();
        expect_event(&mut rx_a);
        assert!(rx_a.recv().await.is_none());
        assert_eq!(hub.total_client_count(), 0);
        assert!(!hub.is_heartbeat_running());
    }
}
