//! The workspace file indexer.

pub mod scan;
pub mod short_name;
pub mod watch;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use notify::{RecommendedWatcher, Watcher};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use scan::{full_scan, incremental_apply, ApplyOutcome};
use watch::{bits_for, relativize, PendingEvents, WatchSet};

#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    pub path: String,
    pub name: String,
    #[serde(rename = "isDir")]
    pub is_dir: bool,
    pub short: String,
}

/// An immutable view of the index: the sorted entry slice plus a base-name
/// index. Cheap to clone — both fields are `Arc`.
#[derive(Clone)]
pub struct Snapshot {
    pub entries: Arc<Vec<Entry>>,
    pub by_name: Arc<HashMap<String, Vec<usize>>>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Snapshot {
            entries: Arc::new(Vec::new()),
            by_name: Arc::new(HashMap::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    EventDriven,
    Pollable,
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("indexed root does not exist: {0}")]
    RootMissing(PathBuf),
}

pub struct IndexerConfig {
    pub root: PathBuf,
    pub watch_cap: usize,
    pub event_cap: usize,
    pub debounce: Duration,
}

impl IndexerConfig {
    pub fn new(root: PathBuf) -> Self {
        IndexerConfig {
            root,
            watch_cap: 10_000,
            event_cap: 1_000,
            debounce: Duration::from_millis(250),
        }
    }
}

struct Inner {
    entries: Arc<Vec<Entry>>,
    by_name: Arc<HashMap<String, Vec<usize>>>,
    watch_set: WatchSet,
    pending: PendingEvents,
}

enum RefreshOutcome {
    TryIncremental(Vec<String>),
    Full,
}

/// Holds the canonical sorted entry list, runs full and incremental scans,
/// manages the watcher set, and disambiguates short names.
///
/// `entries`, `watch_set`, and `pending` live behind one reader-writer lock
/// (`state`); `changed`/`overflowed`/`refresh_running`/last-refresh time are
/// plain atomics.
pub struct Indexer {
    root: PathBuf,
    debounce: Duration,
    state: RwLock<Inner>,
    mode: Mutex<Mode>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    started_at: Instant,
    changed: AtomicBool,
    overflowed: AtomicBool,
    refresh_running: AtomicBool,
    last_refresh_nanos: AtomicI64,
}

impl Indexer {
    pub fn new(config: IndexerConfig) -> Self {
        let root = config.root.clone();
        Indexer {
            root: root.clone(),
            debounce: config.debounce,
            state: RwLock::new(Inner {
                entries: Arc::new(Vec::new()),
                by_name: Arc::new(HashMap::new()),
                watch_set: WatchSet::new(root, config.watch_cap),
                pending: PendingEvents::new(config.event_cap),
            }),
            mode: Mutex::new(Mode::Pollable),
            watcher: Mutex::new(None),
            started_at: Instant::now(),
            changed: AtomicBool::new(true),
            overflowed: AtomicBool::new(false),
            refresh_running: AtomicBool::new(false),
            // Far enough in the past that the first RequestRefresh never hits the debounce guard.
            last_refresh_nanos: AtomicI64::new(i64::MIN / 2),
        }
    }

    /// Initial synchronous scan, then attempt to subscribe to the OS
    /// file-notify service. Subscription failure is non-fatal: the indexer
    /// falls back to *pollable* mode.
    pub async fn start(self: &Arc<Self>) -> Result<(), IndexError> {
        if !self.root.exists() {
            return Err(IndexError::RootMissing(self.root.clone()));
        }

        let root = self.root.clone();
        let entries = tokio::task::spawn_blocking(move || full_scan(&root))
            .await
            .unwrap_or_default();
        self.publish(entries).await;
        self.subscribe().await;
        Ok(())
    }

    /// Cheap, near-lock-free read of the current index.
    pub async fn snapshot(&self) -> Snapshot {
        let st = self.state.read().await;
        Snapshot {
            entries: st.entries.clone(),
            by_name: st.by_name.clone(),
        }
    }

    /// Rate-limited asynchronous refresh, triggered on demand (typically
    /// just before serving a search).
    pub async fn request_refresh(self: &Arc<Self>) {
        if self.refresh_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let event_driven = *self.mode.lock().unwrap() == Mode::EventDriven;
        let should_skip = event_driven && !self.changed.load(Ordering::SeqCst);
        let elapsed_since_last =
            self.started_at.elapsed().as_nanos() as i64 - self.last_refresh_nanos.load(Ordering::SeqCst);
        let debounced = elapsed_since_last < self.debounce.as_nanos() as i64;

        if should_skip || debounced {
            self.refresh_running.store(false, Ordering::SeqCst);
            return;
        }

        self.do_refresh().await;
        self.refresh_running.store(false, Ordering::SeqCst);
    }

    /// Stop watchers and drain the background ingestion task.
    pub async fn close(&self) {
        if let Some(watcher) = self.watcher.lock().unwrap().take() {
            drop(watcher);
        }
    }

    async fn do_refresh(self: &Arc<Self>) {
        let mode = *self.mode.lock().unwrap();

        let outcome = {
            let mut st = self.state.write().await;
            if st.pending.overflowed() {
                self.overflowed.store(true, Ordering::SeqCst);
                let _ = st.pending.take();
                RefreshOutcome::Full
            } else if mode == Mode::EventDriven && !st.pending.is_empty() {
                RefreshOutcome::TryIncremental(st.pending.take())
            } else {
                RefreshOutcome::Full
            }
        };

        let root = self.root.clone();
        let new_entries = match outcome {
            RefreshOutcome::TryIncremental(paths) => {
                let prev: Vec<Entry> = self.state.read().await.entries.as_ref().clone();
                let root2 = root.clone();
                match tokio::task::spawn_blocking(move || incremental_apply(&root2, &prev, &paths)).await {
                    Ok(ApplyOutcome::Applied(entries)) => entries,
                    Ok(ApplyOutcome::NeedsFullScan) | Err(_) => {
                        tokio::task::spawn_blocking(move || full_scan(&root))
                            .await
                            .unwrap_or_default()
                    }
                }
            }
            RefreshOutcome::Full => tokio::task::spawn_blocking(move || full_scan(&root))
                .await
                .unwrap_or_default(),
        };

        self.publish(new_entries).await;
        self.reconcile_watchers().await;

        self.changed.store(false, Ordering::SeqCst);
        self.overflowed.store(false, Ordering::SeqCst);
        self.last_refresh_nanos
            .store(self.started_at.elapsed().as_nanos() as i64, Ordering::SeqCst);
    }

    async fn publish(&self, entries: Vec<Entry>) {
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, e) in entries.iter().enumerate() {
            by_name.entry(e.name.clone()).or_default().push(i);
        }

        let new_len = entries.len();
        let mut st = self.state.write().await;
        let changed = st.entries.len() != new_len;
        st.entries = Arc::new(entries);
        st.by_name = Arc::new(by_name);
        drop(st);

        if changed {
            info!(entries = new_len, "indexer snapshot updated");
        }
    }

    async fn desired_watch_dirs(&self) -> Vec<PathBuf> {
        let st = self.state.read().await;
        st.entries
            .iter()
            .filter(|e| e.is_dir)
            .map(|e| self.root.join(&e.path))
            .collect()
    }

    async fn reconcile_watchers(&self) {
        let desired = self.desired_watch_dirs().await;
        // Take the async write lock first, then the short-lived std mutex —
        // never the other way around, so the std guard is never held across
        // an await point.
        let mut st = self.state.write().await;
        let mut watcher_guard = self.watcher.lock().unwrap();
        if let Some(watcher) = watcher_guard.as_mut() {
            st.watch_set.reconcile(watcher, &desired);
        }
    }

    async fn subscribe(self: &Arc<Self>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Event>();

        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        });

        match watcher {
            Ok(mut w) => {
                let desired = self.desired_watch_dirs().await;
                {
                    let mut st = self.state.write().await;
                    st.watch_set.reconcile(&mut w, &desired);
                }
                *self.watcher.lock().unwrap() = Some(w);
                *self.mode.lock().unwrap() = Mode::EventDriven;

                let me = Arc::clone(self);
                tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        me.ingest(event).await;
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "failed to start filesystem watcher, falling back to pollable mode");
                *self.mode.lock().unwrap() = Mode::Pollable;
            }
        }
    }

    async fn ingest(&self, event: notify::Event) {
        let bits = bits_for(&event.kind);
        let rels = relativize(&self.root, &event.paths);
        if rels.is_empty() {
            return;
        }

        {
            let mut st = self.state.write().await;
            for rel in rels {
                st.pending.record(rel, bits);
            }
        }
        self.changed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn start_populates_snapshot_sorted_and_git_free() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join(".git/HEAD"), "").unwrap();
        fs::write(tmp.path().join("b.txt"), "").unwrap();
        fs::write(tmp.path().join("a.txt"), "").unwrap();

        let indexer = Arc::new(Indexer::new(IndexerConfig::new(tmp.path().to_path_buf())));
        indexer.start().await.unwrap();

        let snap = indexer.snapshot().await;
        let paths: Vec<&str> = snap.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn request_refresh_is_debounced() {
        let tmp = tempfile::tempdir().unwrap();
        let indexer = Arc::new(Indexer::new(IndexerConfig {
            debounce: Duration::from_secs(60),
            ..IndexerConfig::new(tmp.path().to_path_buf())
        }));
        indexer.start().await.unwrap();

        // Establish a real baseline timestamp first; `start()` never calls
        // `request_refresh`, so skipping this leaves `last_refresh_nanos` at
        // its sentinel value and the second call below would not be
        // debounced at all.
        indexer.changed.store(true, Ordering::SeqCst);
        indexer.request_refresh().await;
        let after_first = indexer.last_refresh_nanos.load(Ordering::SeqCst);

        indexer.changed.store(true, Ordering::SeqCst);
        indexer.request_refresh().await;
        let after_second = indexer.last_refresh_nanos.load(Ordering::SeqCst);

        // Within the 60s debounce window, a second RequestRefresh must not
        // run another refresh cycle.
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn missing_root_errors() {
        let indexer = Arc::new(Indexer::new(IndexerConfig::new(PathBuf::from(
            "/nonexistent/definitely/not/here",
        ))));
        assert!(indexer.start().await.is_err());
    }
}
