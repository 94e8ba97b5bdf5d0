//! Storage backends: the `Save`/`Seen` contract every backend implements,
//! and the [`StorageDispatcher`] that fans a pastie out across all of them.
//!
//! Grounded on `original_source/pystemon/storage/__init__.py`'s
//! `PastieStorage`/`StorageDispatcher`: each backend saves independently and
//! errors are logged rather than propagated (one backend's outage should not
//! stop the others), and `seen_pastie` short-circuits on the first backend
//! that reports a hit. The Python original's `StorageSync`/`StorageThread`
//! split (call inline vs. hand off to a background thread) becomes a sync
//! vs. spawned-task choice behind the same trait, driven by one global
//! `save-thread` config setting.

pub mod file;
pub mod mongo;
pub mod redis_backend;
pub mod sqlite;
pub mod telegram;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::pastie::Pastie;

/// Bound on a backend's save queue when `save-thread` is enabled, matching
/// the original's `queue_size` kwarg (there defaulting to unbounded; bounded
/// here so a stuck backend applies backpressure instead of growing forever).
const SAVE_QUEUE_SIZE: usize = 1024;

/// How long `save()` waits for a full queue to drain before giving up on a
/// backend, matching `StorageDispatcher.save_pastie`'s `timeout=5` default.
const SAVE_QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors a storage backend can raise while saving or looking up a pastie.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{backend}: io error: {source}")]
    Io {
        backend: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{backend}: database error: {source}")]
    Database {
        backend: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("{backend}: redis error: {source}")]
    Redis {
        backend: String,
        #[source]
        source: redis::RedisError,
    },
    #[error("{backend}: mongodb error: {source}")]
    Mongo {
        backend: String,
        #[source]
        source: mongodb::error::Error,
    },
    #[error("{backend}: {message}")]
    Backend { backend: String, message: String },
}

/// A place a matched (or, for archival backends, every) pastie can be saved
/// and looked up by id. Implementors own their own connection/handle.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Backend name as it appears in `storage.<name>` config and in logs.
    fn name(&self) -> &str;

    /// Persists `pastie`. Only called when the backend's `save`/`save-all`
    /// config enables it for this pastie (see [`StorageDispatcher::save`]).
    async fn save_pastie(&self, pastie: &Pastie) -> Result<(), StorageError>;

    /// Looks up whether `pastie_id` was already recorded. Backends with
    /// lookup disabled (`lookup: false` in the Python original) should
    /// return `Ok(false)` unconditionally.
    async fn seen_pastie(&self, site: &str, pastie_id: &str) -> Result<bool, StorageError>;
}

/// Whether a pastie is saved to a given backend only when it matched a
/// pattern (`save`), or unconditionally (`save_all`), or not at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    Disabled,
    MatchesOnly,
    All,
}

impl SaveMode {
    #[must_use]
    pub fn from_flags(save: bool, save_all: bool) -> Self {
        if save_all {
            SaveMode::All
        } else if save {
            SaveMode::MatchesOnly
        } else {
            SaveMode::Disabled
        }
    }

    #[must_use]
    pub fn should_save(self, matched: bool) -> bool {
        match self {
            SaveMode::Disabled => false,
            SaveMode::MatchesOnly => matched,
            SaveMode::All => true,
        }
    }
}

struct DispatchedStorage {
    storage: Arc<dyn Storage>,
    mode: SaveMode,
    /// `Some` when `save-thread` is enabled: saves are queued here instead
    /// of awaited inline, and a background task drains them.
    queue: Option<mpsc::Sender<Pastie>>,
}

/// Fans a pastie out to every configured, enabled storage backend, in the
/// order they were registered. `seen_pastie` returns as soon as any backend
/// reports a hit, and is always called inline regardless of `save-thread`:
/// a poller needs the answer before it can decide whether to queue a fetch.
pub struct StorageDispatcher {
    backends: Vec<DispatchedStorage>,
    save_thread: bool,
}

impl Default for StorageDispatcher {
    fn default() -> Self {
        Self::new(false)
    }
}

impl StorageDispatcher {
    /// `save_thread` mirrors the `save-thread` config key: when `true`, each
    /// backend registered afterwards saves via a dedicated background task
    /// instead of being awaited inline by the caller of [`Self::save`].
    #[must_use]
    pub fn new(save_thread: bool) -> Self {
        Self {
            backends: Vec::new(),
            save_thread,
        }
    }

    pub fn register(&mut self, storage: Box<dyn Storage>, mode: SaveMode) {
        let storage: Arc<dyn Storage> = Arc::from(storage);
        let queue = self.save_thread.then(|| {
            let (tx, mut rx) = mpsc::channel::<Pastie>(SAVE_QUEUE_SIZE);
            let backend = Arc::clone(&storage);
            tokio::spawn(async move {
                while let Some(pastie) = rx.recv().await {
                    if let Err(error) = backend.save_pastie(&pastie).await {
                        tracing::error!(backend = backend.name(), %error, "unable to save pastie");
                    }
                }
            });
            tx
        });
        self.backends.push(DispatchedStorage { storage, mode, queue });
    }

    /// Saves to every backend whose mode matches `pastie.matched()`. A
    /// backend's failure (or a full save queue) is logged and does not
    /// block the others.
    pub async fn save(&self, pastie: &Pastie) {
        for entry in &self.backends {
            if !entry.mode.should_save(pastie.matched()) {
                continue;
            }
            if let Some(queue) = &entry.queue {
                if tokio::time::timeout(SAVE_QUEUE_TIMEOUT, queue.send(pastie.clone()))
                    .await
                    .is_err()
                {
                    tracing::error!(backend = entry.storage.name(), "unable to save pastie: queue is full");
                }
            } else if let Err(error) = entry.storage.save_pastie(pastie).await {
                tracing::error!(backend = entry.storage.name(), %error, "unable to save pastie");
            }
        }
    }

    /// `true` if any backend with lookup enabled has already recorded this
    /// pastie id for this site.
    pub async fn seen(&self, site: &str, pastie_id: &str) -> bool {
        for entry in &self.backends {
            match entry.storage.seen_pastie(site, pastie_id).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(error) => {
                    tracing::error!(backend = entry.storage.name(), %error, "unable to check seen_pastie");
                }
            }
        }
        false
    }
}
