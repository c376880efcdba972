//! Capability interfaces and the shared, process-wide `AppState`.
//!
//! Four singletons for the life of the process: the Indexer, the
//! HistoryStore, the authentication token, and the HTTP listener (the
//! listener lives in `router::mod`, not here). All four are threaded
//! through `Arc` fields on this struct and cloned into every connection
//! task — never held as `once_cell`/`lazy_static` globals.

use std::sync::Arc;

use async_trait::async_trait;

use crate::history::{HistoryError, HistoryStore, PromptEntry};
use crate::indexer::{IndexError, Indexer, Snapshot};
use crate::session::{Session, SessionConfig, SessionError};

#[async_trait]
pub trait IndexHost: Send + Sync {
    async fn snapshot(&self) -> Snapshot;
    async fn request_refresh(&self);
}

/// `Indexer::request_refresh` needs `Arc<Self>` (it reschedules itself via
/// `Arc::clone`), which an `&self` trait method can't reconstruct. This
/// thin wrapper holds the `Arc` so the capability interface stays
/// object-safe while the concrete call still gets its `Arc`.
pub struct ArcIndexHost(pub Arc<Indexer>);

#[async_trait]
impl IndexHost for ArcIndexHost {
    async fn snapshot(&self) -> Snapshot {
        self.0.snapshot().await
    }

    async fn request_refresh(&self) {
        self.0.request_refresh().await;
    }
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn start(&self, cfg: SessionConfig) -> Result<Arc<Session>, SessionError>;
}

pub struct ProductionSessionFactory;

#[async_trait]
impl SessionFactory for ProductionSessionFactory {
    async fn start(&self, cfg: SessionConfig) -> Result<Arc<Session>, SessionError> {
        Session::start(cfg).await
    }
}

#[async_trait]
pub trait HistoryBackend: Send + Sync {
    async fn save(&self, entry: PromptEntry) -> Result<(), HistoryError>;
    async fn load(&self) -> Vec<PromptEntry>;
    async fn remove(&self, id: &str) -> Result<(), HistoryError>;
}

#[async_trait]
impl HistoryBackend for HistoryStore {
    async fn save(&self, entry: PromptEntry) -> Result<(), HistoryError> {
        HistoryStore::save(self, entry)
    }

    async fn load(&self) -> Vec<PromptEntry> {
        HistoryStore::load(self)
    }

    async fn remove(&self, id: &str) -> Result<(), HistoryError> {
        HistoryStore::remove(self, id)
    }
}

/// The four process-wide singletons, cloned (cheaply, as `Arc`s) into every
/// connection task.
#[derive(Clone)]
pub struct AppState {
    pub index: Arc<dyn IndexHost>,
    pub sessions: Arc<dyn SessionFactory>,
    pub history: Arc<dyn HistoryBackend>,
    pub auth_token: Arc<str>,
}

impl AppState {
    pub fn new(
        index: Arc<dyn IndexHost>,
        sessions: Arc<dyn SessionFactory>,
        history: Arc<dyn HistoryBackend>,
        auth_token: String,
    ) -> Self {
        AppState {
            index,
            sessions,
            history,
            auth_token: auth_token.into(),
        }
    }
}
