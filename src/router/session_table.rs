//! The Router's session table.
//!
//! Guarded by its own lock; `Session` objects themselves are owned
//! exclusively by their forwarder/exit tasks once spawned, so the table
//! only ever holds `Arc` handles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::mpsc;

use crate::session::Session;

use super::messages::ServerMessage;

/// One live session plus the routing state the Router needs around it:
/// which writer channel currently owns it (swapped on adoption), the last
/// sequence number sent for its stdout, and whether it has already exited.
///
/// An exited entry stays in the table as a tombstone rather than being
/// dropped immediately, so a `stdin` that arrives after `exit` can be told
/// apart from one addressed to a session id that never existed.
pub struct SessionEntry {
    pub session: Arc<Session>,
    pub writer: StdMutex<mpsc::UnboundedSender<ServerMessage>>,
    pub last_seq: AtomicU64,
    pub exited: AtomicBool,
}

impl SessionEntry {
    pub fn new(session: Arc<Session>, writer: mpsc::UnboundedSender<ServerMessage>) -> Self {
        SessionEntry {
            session,
            writer: StdMutex::new(writer),
            last_seq: AtomicU64::new(0),
            exited: AtomicBool::new(false),
        }
    }

    pub fn send(&self, msg: ServerMessage) {
        let writer = self.writer.lock().unwrap().clone();
        let _ = writer.send(msg);
    }

    pub fn next_seq(&self) -> u64 {
        self.last_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn adopt(&self, writer: mpsc::UnboundedSender<ServerMessage>) {
        *self.writer.lock().unwrap() = writer;
    }

    pub fn mark_exited(&self) {
        self.exited.store(true, Ordering::SeqCst);
    }

    pub fn is_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct SessionTable {
    inner: StdMutex<HashMap<String, Arc<SessionEntry>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        SessionTable::default()
    }

    pub fn insert(&self, id: String, entry: Arc<SessionEntry>) {
        self.inner.lock().unwrap().insert(id, entry);
    }

    pub fn get(&self, id: &str) -> Option<Arc<SessionEntry>> {
        self.inner.lock().unwrap().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<SessionEntry>> {
        self.inner.lock().unwrap().remove(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Empties the table and returns every entry that was live, for
    /// process-level shutdown.
    pub fn drain(&self) -> Vec<Arc<SessionEntry>> {
        self.inner.lock().unwrap().drain().map(|(_, v)| v).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{PtyMode, SessionConfig};

    #[tokio::test]
    async fn insert_get_remove_round_trips() {
        let table = SessionTable::new();
        let session = Session::start(SessionConfig {
            command: "true".to_string(),
            pty_mode: PtyMode::Disabled,
            ..Default::default()
        })
        .await
        .unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let entry = Arc::new(SessionEntry::new(session, tx));

        table.insert("a".to_string(), Arc::clone(&entry));
        assert_eq!(table.len(), 1);
        assert!(table.get("a").is_some());
        assert!(table.remove("a").is_some());
        assert!(table.get("a").is_none());
    }

    #[tokio::test]
    async fn adopt_redirects_future_sends_to_the_new_writer() {
        let session = Session::start(SessionConfig {
            command: "true".to_string(),
            pty_mode: PtyMode::Disabled,
            ..Default::default()
        })
        .await
        .unwrap();
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let entry = SessionEntry::new(session, old_tx);

        let (new_tx, mut new_rx) = mpsc::unbounded_channel();
        entry.adopt(new_tx);
        entry.send(ServerMessage::Pong);

        assert!(new_rx.try_recv().is_ok());
        assert!(old_rx.try_recv().is_err());
    }
}
