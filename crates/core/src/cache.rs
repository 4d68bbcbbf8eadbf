// crates/core/src/cache.rs
//! File-level cache of parsed log entries.
//!
//! Every log file is parsed at most once per modification time. A refresh
//! walks the current file listing, reuses records whose stored mtime still
//! matches, re-parses the rest, and evicts records for files that vanished.
//!
//! Concurrent [`FileCache::refresh`] calls are coalesced: while one refresh is
//! running, later callers await the same shared future and receive the same
//! `Arc`. Once it completes the handle is dropped, so the next caller starts a
//! fresh refresh instead of reading a stale result.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Instant, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::discovery::FileStamp;
use crate::error::{DiscoveryError, ParseError, RefreshError};
use crate::types::LogEntry;

/// Where the cache gets its files from.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Current log files with their modification times, in scan order.
    async fn modification_times(&self) -> Result<Vec<FileStamp>, DiscoveryError>;

    /// Parse one file into its records, in on-disk order.
    async fn parse(&self, path: &Path) -> Result<Vec<LogEntry>, ParseError>;

    /// Project tag attached to every entry of `path`.
    fn project_tag(&self, path: &Path) -> String;
}

/// Result of a refresh: every entry of every known file, flattened.
pub type RefreshResult = Result<Arc<Vec<LogEntry>>, RefreshError>;

type RefreshFuture = Shared<BoxFuture<'static, RefreshResult>>;

/// Parsed contents of one log file at one modification time.
#[derive(Debug, Clone)]
pub struct FileCacheRecord {
    pub path: PathBuf,
    pub entries: Arc<Vec<LogEntry>>,
    pub modified: SystemTime,
    pub source_project: String,
}

/// Snapshot of cache occupancy for monitoring endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub is_loaded: bool,
    pub cached_file_count: usize,
    pub total_cached_entries: usize,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub is_refreshing: bool,
    pub files_from_cache: usize,
    pub files_reparsed: usize,
    pub file_details: Vec<CachedFileDetail>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedFileDetail {
    pub file_path: String,
    pub entry_count: usize,
    pub modified: DateTime<Utc>,
}

#[derive(Default)]
struct CacheState {
    records: HashMap<PathBuf, FileCacheRecord>,
    last_refresh_at: Option<DateTime<Utc>>,
    files_from_cache: usize,
    files_reparsed: usize,
}

struct InFlight {
    generation: u64,
    future: RefreshFuture,
}

struct CacheInner {
    source: Arc<dyn LogSource>,
    state: Mutex<CacheState>,
    in_flight: Mutex<Option<InFlight>>,
    generation: AtomicU64,
}

/// Explicitly constructed, cheaply cloneable handle to a file cache.
#[derive(Clone)]
pub struct FileCache {
    inner: Arc<CacheInner>,
}

impl FileCache {
    pub fn new(source: Arc<dyn LogSource>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                source,
                state: Mutex::new(CacheState::default()),
                in_flight: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Bring the cache up to date and return all entries.
    ///
    /// Joins the running refresh if there is one.
    pub async fn refresh(&self) -> RefreshResult {
        let future = {
            let mut slot = self.inner.lock_in_flight();
            let future = match slot.as_ref() {
                Some(in_flight) => {
                    debug!(generation = in_flight.generation, "Refresh already in progress, joining it");
                    in_flight.future.clone()
                }
                None => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
                    let inner = Arc::clone(&self.inner);
                    let future = async move {
                        let result = inner.run_refresh().await;
                        inner.finish_in_flight(generation);
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(InFlight {
                        generation,
                        future: future.clone(),
                    });
                    future
                }
            };
            future
        };
        future.await
    }

    /// Drop the cached record of one file.
    pub fn invalidate(&self, path: &Path) {
        if self.inner.lock_state().records.remove(path).is_some() {
            debug!(path = %path.display(), "File cache entry invalidated");
        }
    }

    /// Drop every record and forget the in-flight refresh.
    pub fn clear(&self) {
        let (file_count, entry_count) = {
            let mut state = self.inner.lock_state();
            let file_count = state.records.len();
            let entry_count = state.records.values().map(|r| r.entries.len()).sum::<usize>();
            *state = CacheState::default();
            (file_count, entry_count)
        };
        *self.inner.lock_in_flight() = None;
        info!(
            cached_file_count = file_count,
            total_entries = entry_count,
            "File cache cleared"
        );
    }

    /// Whether the record for `path` would be reused at modification time `modified`.
    pub fn is_valid(&self, path: &Path, modified: SystemTime) -> bool {
        self.inner
            .lock_state()
            .records
            .get(path)
            .is_some_and(|r| r.modified == modified)
    }

    /// Cached record for `path`, if any.
    pub fn record(&self, path: &Path) -> Option<FileCacheRecord> {
        self.inner.lock_state().records.get(path).cloned()
    }

    pub fn stats(&self) -> CacheStats {
        let is_refreshing = self.inner.lock_in_flight().is_some();
        let state = self.inner.lock_state();
        let mut file_details: Vec<_> = state
            .records
            .values()
            .map(|r| CachedFileDetail {
                file_path: r.path.display().to_string(),
                entry_count: r.entries.len(),
                modified: DateTime::<Utc>::from(r.modified),
            })
            .collect();
        file_details.sort_by(|a, b| a.file_path.cmp(&b.file_path));

        CacheStats {
            is_loaded: state.last_refresh_at.is_some(),
            cached_file_count: state.records.len(),
            total_cached_entries: file_details.iter().map(|d| d.entry_count).sum(),
            last_refresh_at: state.last_refresh_at,
            is_refreshing,
            files_from_cache: state.files_from_cache,
            files_reparsed: state.files_reparsed,
            file_details,
        }
    }
}

impl CacheInner {
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().expect("file cache lock poisoned")
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.in_flight.lock().expect("in-flight lock poisoned")
    }

    /// Release the single-flight slot, unless it was already replaced
    /// (e.g. by `clear()` followed by a new refresh).
    fn finish_in_flight(&self, generation: u64) {
        let mut slot = self.lock_in_flight();
        if slot.as_ref().is_some_and(|f| f.generation == generation) {
            *slot = None;
        }
    }

    async fn run_refresh(&self) -> RefreshResult {
        let started = Instant::now();
        let stamps = self.source.modification_times().await.map_err(|e| {
            warn!(error = %e, "Failed to list log files");
            RefreshError::from(e)
        })?;

        let mut all_entries = Vec::new();
        let mut files_from_cache = 0usize;
        let mut files_reparsed = 0usize;
        let mut files_failed = 0usize;

        for stamp in &stamps {
            let cached = {
                let state = self.lock_state();
                state
                    .records
                    .get(&stamp.path)
                    .filter(|r| r.modified == stamp.modified)
                    .map(|r| Arc::clone(&r.entries))
            };

            let entries = match cached {
                Some(entries) => {
                    files_from_cache += 1;
                    entries
                }
                None => match self.source.parse(&stamp.path).await {
                    Ok(mut entries) => {
                        let source_project = self.source.project_tag(&stamp.path);
                        for entry in &mut entries {
                            entry.source_project = Some(source_project.clone());
                        }
                        let entries = Arc::new(entries);
                        self.lock_state().records.insert(
                            stamp.path.clone(),
                            FileCacheRecord {
                                path: stamp.path.clone(),
                                entries: Arc::clone(&entries),
                                modified: stamp.modified,
                                source_project,
                            },
                        );
                        files_reparsed += 1;
                        entries
                    }
                    Err(e) => {
                        warn!(path = %stamp.path.display(), error = %e, "Failed to parse log file, skipping");
                        self.lock_state().records.remove(&stamp.path);
                        files_failed += 1;
                        continue;
                    }
                },
            };
            all_entries.extend(entries.iter().cloned());
        }

        let current: HashSet<&Path> = stamps.iter().map(|s| s.path.as_path()).collect();
        let cached_file_count = {
            let mut state = self.lock_state();
            state.records.retain(|path, _| {
                let keep = current.contains(path.as_path());
                if !keep {
                    debug!(path = %path.display(), "Evicting cache entry for removed file");
                }
                keep
            });
            state.last_refresh_at = Some(Utc::now());
            state.files_from_cache = files_from_cache;
            state.files_reparsed = files_reparsed;
            state.records.len()
        };

        debug!(
            total_files = stamps.len(),
            files_from_cache,
            files_reparsed,
            files_failed,
            total_entries = all_entries.len(),
            cached_file_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "File cache refresh complete"
        );
        Ok(Arc::new(all_entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntryType;
    use pretty_assertions::assert_eq;
    use std::time::{Duration, UNIX_EPOCH};

    /// In-memory log source with per-file parse counters.
    #[derive(Default)]
    struct FakeSource {
        files: Mutex<Vec<FileStamp>>,
        contents: Mutex<HashMap<PathBuf, Vec<LogEntry>>>,
        broken: Mutex<HashSet<PathBuf>>,
        parse_counts: Mutex<HashMap<PathBuf, usize>>,
        listing_calls: AtomicU64,
        fail_listing: std::sync::atomic::AtomicBool,
        parse_delay: Option<Duration>,
    }

    impl FakeSource {
        fn with_delay(delay: Duration) -> Self {
            Self {
                parse_delay: Some(delay),
                ..Self::default()
            }
        }

        fn put(&self, path: &str, mtime_secs: u64, uuids: &[&str]) {
            let path = PathBuf::from(path);
            let modified = UNIX_EPOCH + Duration::from_secs(mtime_secs);
            let mut files = self.files.lock().unwrap();
            match files.iter_mut().find(|f| f.path == path) {
                Some(stamp) => stamp.modified = modified,
                None => files.push(FileStamp {
                    path: path.clone(),
                    modified,
                }),
            }
            let entries = uuids
                .iter()
                .map(|u| LogEntry::message(EntryType::User, *u, "s1", "2025-01-01T00:00:00Z"))
                .collect();
            self.contents.lock().unwrap().insert(path, entries);
        }

        fn remove(&self, path: &str) {
            self.files.lock().unwrap().retain(|f| f.path != Path::new(path));
        }

        fn break_file(&self, path: &str) {
            self.broken.lock().unwrap().insert(PathBuf::from(path));
        }

        fn parses(&self, path: &str) -> usize {
            self.parse_counts
                .lock()
                .unwrap()
                .get(Path::new(path))
                .copied()
                .unwrap_or(0)
        }

        fn total_parses(&self) -> usize {
            self.parse_counts.lock().unwrap().values().sum()
        }
    }

    #[async_trait]
    impl LogSource for FakeSource {
        async fn modification_times(&self) -> Result<Vec<FileStamp>, DiscoveryError> {
            self.listing_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.parse_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_listing.load(Ordering::SeqCst) {
                return Err(DiscoveryError::HomeDirNotFound);
            }
            Ok(self.files.lock().unwrap().clone())
        }

        async fn parse(&self, path: &Path) -> Result<Vec<LogEntry>, ParseError> {
            if let Some(delay) = self.parse_delay {
                tokio::time::sleep(delay).await;
            }
            *self
                .parse_counts
                .lock()
                .unwrap()
                .entry(path.to_path_buf())
                .or_insert(0) += 1;
            if self.broken.lock().unwrap().contains(path) {
                return Err(ParseError::io(
                    path,
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "corrupt"),
                ));
            }
            self.contents
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| ParseError::not_found(path))
        }

        fn project_tag(&self, path: &Path) -> String {
            crate::discovery::project_tag(path)
        }
    }

    fn uuids(entries: &[LogEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.uuid.as_str()).collect()
    }

    #[tokio::test]
    async fn test_unchanged_refresh_reparses_nothing() {
        let source = Arc::new(FakeSource::default());
        source.put("/p/proj-a/1.jsonl", 1, &["a1", "a2"]);
        source.put("/p/proj-b/2.jsonl", 1, &["b1"]);
        let cache = FileCache::new(source.clone());

        let first = cache.refresh().await.unwrap();
        assert_eq!(source.total_parses(), 2);

        let second = cache.refresh().await.unwrap();
        assert_eq!(source.total_parses(), 2, "second refresh must not re-parse");
        assert_eq!(*first, *second);
        assert_eq!(cache.stats().files_from_cache, 2);
        assert_eq!(cache.stats().files_reparsed, 0);
    }

    #[tokio::test]
    async fn test_entries_tagged_with_source_project() {
        let source = Arc::new(FakeSource::default());
        source.put("/p/-Users-me-app/1.jsonl", 1, &["a"]);
        let cache = FileCache::new(source);

        let entries = cache.refresh().await.unwrap();
        assert_eq!(entries[0].source_project.as_deref(), Some("-Users-me-app"));
    }

    #[tokio::test]
    async fn test_only_touched_file_is_reparsed() {
        let source = Arc::new(FakeSource::default());
        source.put("/p/x/1.jsonl", 1, &["a"]);
        source.put("/p/x/2.jsonl", 1, &["b"]);
        source.put("/p/x/3.jsonl", 2, &["c"]);
        let cache = FileCache::new(source.clone());

        let before = cache.refresh().await.unwrap();
        assert_eq!(cache.stats().cached_file_count, 3);

        source.put("/p/x/3.jsonl", 3, &["c", "d"]);
        let after = cache.refresh().await.unwrap();

        assert_eq!(source.parses("/p/x/1.jsonl"), 1);
        assert_eq!(source.parses("/p/x/2.jsonl"), 1);
        assert_eq!(source.parses("/p/x/3.jsonl"), 2);
        assert_eq!(uuids(&after), vec!["a", "b", "c", "d"]);
        assert_eq!(before[0], after[0]);
        assert_eq!(before[1], after[1]);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_skipped_and_evicted() {
        let source = Arc::new(FakeSource::default());
        source.put("/p/x/good.jsonl", 1, &["g"]);
        source.put("/p/x/bad.jsonl", 1, &["b"]);
        let cache = FileCache::new(source.clone());

        cache.refresh().await.unwrap();
        assert!(cache.record(Path::new("/p/x/bad.jsonl")).is_some());

        source.put("/p/x/bad.jsonl", 2, &["b2"]);
        source.break_file("/p/x/bad.jsonl");
        let entries = cache.refresh().await.unwrap();

        assert_eq!(uuids(&entries), vec!["g"]);
        assert!(cache.record(Path::new("/p/x/bad.jsonl")).is_none());
        assert_eq!(cache.stats().cached_file_count, 1);
    }

    #[tokio::test]
    async fn test_deleted_file_is_evicted() {
        let source = Arc::new(FakeSource::default());
        source.put("/p/x/1.jsonl", 1, &["a"]);
        source.put("/p/x/2.jsonl", 1, &["b"]);
        let cache = FileCache::new(source.clone());
        cache.refresh().await.unwrap();

        source.remove("/p/x/2.jsonl");
        let entries = cache.refresh().await.unwrap();

        assert_eq!(uuids(&entries), vec!["a"]);
        assert!(cache.record(Path::new("/p/x/2.jsonl")).is_none());
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_result() {
        let source = Arc::new(FakeSource::with_delay(Duration::from_millis(20)));
        source.put("/p/x/1.jsonl", 1, &["a"]);
        source.put("/p/x/2.jsonl", 1, &["b"]);
        let cache = FileCache::new(source.clone());

        let (a, b) = tokio::join!(cache.refresh(), cache.refresh());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(Arc::ptr_eq(&a, &b), "coalesced callers must get the same result");
        assert_eq!(source.total_parses(), 2);
        assert_eq!(source.listing_calls.load(Ordering::SeqCst), 1);
        assert!(!cache.stats().is_refreshing);
    }

    #[tokio::test]
    async fn test_refresh_after_completion_starts_fresh() {
        let source = Arc::new(FakeSource::default());
        source.put("/p/x/1.jsonl", 1, &["a"]);
        let cache = FileCache::new(source.clone());

        let first = cache.refresh().await.unwrap();
        let second = cache.refresh().await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(source.listing_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shared_failure_reaches_every_waiter_then_retries() {
        let source = Arc::new(FakeSource::with_delay(Duration::from_millis(20)));
        source.put("/p/x/1.jsonl", 1, &["a"]);
        source.fail_listing.store(true, Ordering::SeqCst);
        let cache = FileCache::new(source.clone());

        let (a, b) = tokio::join!(cache.refresh(), cache.refresh());
        assert!(a.is_err());
        assert!(b.is_err());
        assert_eq!(source.listing_calls.load(Ordering::SeqCst), 1);

        source.fail_listing.store(false, Ordering::SeqCst);
        let entries = cache.refresh().await.unwrap();
        assert_eq!(uuids(&entries), vec!["a"]);
    }

    #[tokio::test]
    async fn test_invalidate_forces_single_reparse() {
        let source = Arc::new(FakeSource::default());
        source.put("/p/x/1.jsonl", 1, &["a"]);
        source.put("/p/x/2.jsonl", 1, &["b"]);
        let cache = FileCache::new(source.clone());
        cache.refresh().await.unwrap();

        cache.invalidate(Path::new("/p/x/1.jsonl"));
        assert!(!cache.is_valid(Path::new("/p/x/1.jsonl"), UNIX_EPOCH + Duration::from_secs(1)));
        assert!(cache.is_valid(Path::new("/p/x/2.jsonl"), UNIX_EPOCH + Duration::from_secs(1)));

        cache.refresh().await.unwrap();
        assert_eq!(source.parses("/p/x/1.jsonl"), 2);
        assert_eq!(source.parses("/p/x/2.jsonl"), 1);
    }

    #[tokio::test]
    async fn test_clear_drops_everything() {
        let source = Arc::new(FakeSource::default());
        source.put("/p/x/1.jsonl", 1, &["a"]);
        let cache = FileCache::new(source.clone());
        cache.refresh().await.unwrap();

        cache.clear();
        let stats = cache.stats();
        assert!(!stats.is_loaded);
        assert_eq!(stats.cached_file_count, 0);

        cache.refresh().await.unwrap();
        assert_eq!(source.parses("/p/x/1.jsonl"), 2);
    }

    #[tokio::test]
    async fn test_stats_report_file_details() {
        let source = Arc::new(FakeSource::default());
        source.put("/p/x/1.jsonl", 1, &["a", "b"]);
        let cache = FileCache::new(source);
        cache.refresh().await.unwrap();

        let stats = cache.stats();
        assert!(stats.is_loaded);
        assert_eq!(stats.total_cached_entries, 2);
        assert_eq!(stats.file_details.len(), 1);
        assert_eq!(stats.file_details[0].file_path, "/p/x/1.jsonl");
    }
}
