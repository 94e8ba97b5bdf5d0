//! Mutable, hot-reloadable set of outbound proxies with failure accounting.
//!
//! Grounded on `original_source/pystemon/proxy.py`'s `ProxyList`: a
//! newline-delimited text file, reloaded by polling its mtime once a second,
//! with proxies removed after their second recorded failure unless they are
//! the last one standing.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Errors from loading or reloading the proxy file.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to read proxy file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
struct ProxyEntry {
    url: String,
    failures: u32,
}

struct ProxyListState {
    entries: Vec<ProxyEntry>,
    last_mtime: Option<SystemTime>,
}

/// A mutable set of proxy URLs loaded from a text file, with failure
/// accounting. All mutation is serialized by a single internal lock.
pub struct ProxyList {
    path: PathBuf,
    state: Mutex<ProxyListState>,
}

impl ProxyList {
    /// Loads the initial proxy set from `path`. One proxy per line, blank
    /// lines ignored.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ProxyError> {
        let path = path.into();
        let (entries, mtime) = read_proxy_file(&path)?;
        Ok(Self {
            path,
            state: Mutex::new(ProxyListState {
                entries,
                last_mtime: mtime,
            }),
        })
    }

    /// Returns a random proxy URL, or `None` if the list is empty.
    #[must_use]
    pub fn random(&self) -> Option<String> {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state
            .entries
            .choose(&mut rand::thread_rng())
            .map(|entry| entry.url.clone())
    }

    /// Returns the number of proxies currently in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records a failure for `proxy`. On the second recorded failure the
    /// proxy is removed, unless it is the last remaining entry.
    #[instrument(skip(self))]
    pub fn fail(&self, proxy: &str) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let len_before = state.entries.len();
        let mut remove_index = None;
        for (index, entry) in state.entries.iter_mut().enumerate() {
            if entry.url == proxy {
                entry.failures += 1;
                if entry.failures >= 2 {
                    remove_index = Some(index);
                }
                break;
            }
        }
        if let Some(index) = remove_index {
            if len_before > 1 {
                warn!(proxy, "removing proxy after repeated failures");
                state.entries.remove(index);
            } else {
                debug!(proxy, "last proxy remaining, keeping despite failures");
            }
        }
    }

    /// Atomically replaces the list from disk and resets failure counts.
    #[instrument(skip(self))]
    pub fn reload(&self) -> Result<(), ProxyError> {
        let (entries, mtime) = read_proxy_file(&self.path)?;
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        info!(count = entries.len(), "reloaded proxy list");
        state.entries = entries;
        state.last_mtime = mtime;
        Ok(())
    }

    fn mtime_changed(&self) -> bool {
        let Ok(metadata) = std::fs::metadata(&self.path) else {
            return false;
        };
        let Ok(mtime) = metadata.modified() else {
            return false;
        };
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.last_mtime != Some(mtime)
    }

    /// Polls the file's mtime once per second, reloading on change, until
    /// `stopped` is set.
    pub async fn watch(self: std::sync::Arc<Self>, stopped: std::sync::Arc<std::sync::atomic::AtomicBool>) {
        while !stopped.load(std::sync::atomic::Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if self.mtime_changed()
                && let Err(error) = self.reload()
            {
                warn!(%error, "proxy file reload failed, keeping previous list");
            }
        }
    }
}

fn read_proxy_file(path: &Path) -> Result<(Vec<ProxyEntry>, Option<SystemTime>), ProxyError> {
    let text = std::fs::read_to_string(path).map_err(|source| ProxyError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let entries = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| ProxyEntry {
            url: line.to_string(),
            failures: 0,
        })
        .collect();
    let mtime = std::fs::metadata(path).ok().and_then(|m| m.modified().ok());
    Ok((entries, mtime))
}
