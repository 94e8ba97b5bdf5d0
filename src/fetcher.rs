//! Fixed-size worker pool draining one site's pastie queue.
//!
//! Grounded on `original_source/pystemon/pastie/__init__.py`'s
//! `ThreadPasties`: N threads per site, each blocking on the queue with a
//! short timeout so it can notice `kill_received`, and running a pastie
//! through fetch → hash → match → save → notify on every pop, logging and
//! continuing on a per-pastie failure rather than crashing the worker.
//! `download/engine.rs`'s semaphore-gated `tokio::spawn` per item is the
//! nearer example of Rust task fan-out, adapted here to a fixed worker
//! count draining a shared channel (the spec's "N workers per site") rather
//! than one task per queue item.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{error, warn};

use crate::pastie::Pastie;
use crate::pattern::PatternSet;
use crate::site::PastieSite;
use crate::storage::StorageDispatcher;
use crate::useragent::UserAgent;

/// A queued unit of work: the pastie id to fetch, formatted against its
/// site's URL templates when the worker picks it up.
pub struct FetchJob {
    pub id: String,
}

/// Sending half of a site's fetch queue, cloneable across producers (the
/// archive poller is the only producer today).
pub type FetchQueueSender = mpsc::Sender<FetchJob>;

/// Spawns `worker_count` tasks draining `receiver`, each processing pasties
/// against `site`/`ua`/`patterns`/`storage`. Optional `notifier` is invoked
/// only for matched pasties. Returns the worker handles so the caller
/// (the supervisor) can join them on shutdown.
#[must_use]
pub fn spawn_workers(
    worker_count: usize,
    receiver: mpsc::Receiver<FetchJob>,
    site: Arc<PastieSite>,
    ua: Arc<UserAgent>,
    patterns: Arc<PatternSet>,
    storage: Arc<StorageDispatcher>,
    notifier: Option<Arc<dyn crate::notify::Notifier>>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let receiver = Arc::new(Mutex::new(receiver));
    (0..worker_count.max(1))
        .map(|worker_id| {
            let receiver = Arc::clone(&receiver);
            let site = Arc::clone(&site);
            let ua = Arc::clone(&ua);
            let patterns = Arc::clone(&patterns);
            let storage = Arc::clone(&storage);
            let notifier = notifier.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut receiver = receiver.lock().await;
                        receiver.recv().await
                    };
                    let Some(job) = job else {
                        break;
                    };
                    process_job(worker_id, &site, &ua, &patterns, &storage, notifier.as_deref(), job)
                        .await;
                }
            })
        })
        .collect()
}

async fn process_job(
    worker_id: usize,
    site: &PastieSite,
    ua: &UserAgent,
    patterns: &PatternSet,
    storage: &StorageDispatcher,
    notifier: Option<&dyn crate::notify::Notifier>,
    job: FetchJob,
) {
    let filename = site.pastie_id_to_filename(&job.id);
    let mut pastie = Pastie::new(
        site.name.clone(),
        job.id.clone(),
        &site.download_url,
        &site.public_url,
        site.metadata_url.as_deref(),
        filename,
    );

    if let Err(error) = pastie.fetch(ua).await {
        warn!(worker_id, site = %site.name, id = %job.id, %error, "failed to fetch pastie");
        return;
    }
    pastie.hash();
    pastie.find_matches(patterns);

    storage.save(&pastie).await;

    if pastie.matched()
        && let Some(notifier) = notifier
    {
        notifier.notify(&pastie).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageDispatcher;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_worker_drains_queue_and_saves_matches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/raw/.*"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"leaked password!".to_vec()))
            .mount(&server)
            .await;

        let site = Arc::new(
            PastieSite::new(
                "testsite",
                format!("{}/raw/{{id}}", server.uri()),
                None,
                None,
                format!("{}/archive", server.uri()),
                r#"(\w+)"#,
                1,
                2,
                false,
            )
            .unwrap(),
        );
        let ua = Arc::new(UserAgent::new(None, None, Vec::new()).unwrap());
        let patterns = Arc::new(
            PatternSet::compile(&[crate::config::PatternSpec {
                search: "password".to_string(),
                exclude: None,
                count: None,
                description: None,
                regex_flags: None,
                to: Vec::new(),
                extra: std::collections::HashMap::new(),
            }])
            .unwrap(),
        );
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = StorageDispatcher::new(false);
        dispatcher.register(
            Box::new(crate::storage::file::FileStorage::new(
                "file",
                Some(dir.path().to_path_buf()),
                None,
                false,
            )),
            crate::storage::SaveMode::MatchesOnly,
        );
        let storage = Arc::new(dispatcher);

        let (tx, rx) = mpsc::channel(4);
        let handles = spawn_workers(2, rx, site, ua, patterns, storage.clone(), None);
        tx.send(FetchJob {
            id: "abc123".to_string(),
        })
        .await
        .unwrap();
        drop(tx);
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(storage.seen("testsite", "abc123").await);
    }
}
