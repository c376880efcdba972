//! Watcher-set diffing and pending-event buffering.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::warn;

/// Observed event kinds, ORed into a bitmask per path.
pub const EVENT_CREATE: u8 = 1 << 0;
pub const EVENT_WRITE: u8 = 1 << 1;
pub const EVENT_REMOVE: u8 = 1 << 2;
pub const EVENT_RENAME: u8 = 1 << 3;
pub const EVENT_CHMOD: u8 = 1 << 4;

pub fn bits_for(kind: &notify::EventKind) -> u8 {
    use notify::EventKind::*;
    match kind {
        Create(_) => EVENT_CREATE,
        Modify(notify::event::ModifyKind::Metadata(_)) => EVENT_CHMOD,
        Modify(notify::event::ModifyKind::Name(_)) => EVENT_RENAME,
        Modify(_) => EVENT_WRITE,
        Remove(_) => EVENT_REMOVE,
        _ => EVENT_WRITE,
    }
}

/// The set of directories currently subscribed to the OS notifier, bounded
/// by `cap`. The root is always included and never evicted.
pub struct WatchSet {
    root: PathBuf,
    cap: usize,
    live: HashSet<PathBuf>,
}

impl WatchSet {
    pub fn new(root: PathBuf, cap: usize) -> Self {
        WatchSet {
            root,
            cap,
            live: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Diff the desired directory set (root plus every directory in the
    /// current snapshot) against what is currently watched, unwatching first
    /// and then watching up to the cap.
    pub fn reconcile(&mut self, watcher: &mut RecommendedWatcher, desired: &[PathBuf]) {
        let mut want: HashSet<PathBuf> = desired.iter().cloned().collect();
        want.insert(self.root.clone());

        let to_remove: Vec<PathBuf> = self.live.difference(&want).cloned().collect();
        for dir in to_remove {
            if watcher.unwatch(&dir).is_ok() {
                self.live.remove(&dir);
            }
        }

        let mut to_add: Vec<PathBuf> = want.difference(&self.live).cloned().collect();
        to_add.sort();

        for dir in to_add {
            if self.live.len() >= self.cap && dir != self.root {
                continue;
            }
            match watcher.watch(&dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    self.live.insert(dir);
                }
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "failed to watch directory");
                }
            }
        }
    }
}

/// Bounded map from root-relative path to an observed-event bitmask.
/// Overflow discards the whole map and raises a flag the caller consults to
/// force a full scan on the next refresh.
pub struct PendingEvents {
    cap: usize,
    events: HashMap<String, u8>,
    overflowed: bool,
}

impl PendingEvents {
    pub fn new(cap: usize) -> Self {
        PendingEvents {
            cap,
            events: HashMap::new(),
            overflowed: false,
        }
    }

    pub fn record(&mut self, path: String, bits: u8) {
        if self.overflowed {
            return;
        }
        if !self.events.contains_key(&path) && self.events.len() >= self.cap {
            self.events.clear();
            self.overflowed = true;
            return;
        }
        *self.events.entry(path).or_insert(0) |= bits;
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Drain the buffer, resetting the overflow flag.
    pub fn take(&mut self) -> Vec<String> {
        self.overflowed = false;
        self.events.drain().map(|(k, _)| k).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Resolve a notify event's paths to root-relative, forward-slash strings.
/// Paths that fall outside `root` are dropped.
pub fn relativize(root: &Path, event_paths: &[PathBuf]) -> Vec<String> {
    event_paths
        .iter()
        .filter_map(|p| {
            p.strip_prefix(root).ok().map(|rel| {
                rel.to_string_lossy().replace('\\', "/")
            })
        })
        .filter(|rel| !rel.is_empty())
        .collect()
}
