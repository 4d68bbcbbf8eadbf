// crates/server/src/state.rs
//! Application state for the Axum server.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use claude_relay_core::{FileCache, FsLogSource, HistoryReader, InMemorySessionInfoStore, LogSource, SessionInfoStore};
use tokio::sync::mpsc;

use crate::live::{spawn_feed_consumer, FeedEvent, SessionRegistry, StreamHub};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Conversation history over the shared file cache.
    pub history: HistoryReader,
    /// Sessions with a running process.
    pub registry: Arc<SessionRegistry>,
    /// Per-stream observer fan-out.
    pub hub: Arc<StreamHub>,
    /// Sender half of the process supervisor feed.
    pub feed_tx: mpsc::Sender<FeedEvent>,
}

impl AppState {
    /// State reading logs under `claude_home`, with an in-memory session
    /// metadata store.
    ///
    /// Spawns the feed consumer, so this must run inside a tokio runtime.
    pub fn new(claude_home: &Path, heartbeat_interval: Duration) -> Arc<Self> {
        Self::with_parts(
            Arc::new(FsLogSource::new(claude_home)),
            Arc::new(InMemorySessionInfoStore::new()),
            heartbeat_interval,
        )
    }

    pub fn with_parts(
        source: Arc<dyn LogSource>,
        session_info: Arc<dyn SessionInfoStore>,
        heartbeat_interval: Duration,
    ) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new());
        let hub = Arc::new(StreamHub::new(heartbeat_interval));
        let (feed_tx, _consumer) = spawn_feed_consumer(registry.clone(), hub.clone());

        Arc::new(Self {
            start_time: Instant::now(),
            history: HistoryReader::new(FileCache::new(source), session_info),
            registry,
            hub,
            feed_tx,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
