//! Process lifecycle: load config, build the task graph, run until a
//! signal asks for a reload or a stop.
//!
//! Grounded on `original_source/pystemon.py`'s `main`/`load_config`: SIGTERM
//! stops everything, SIGHUP rebuilds the task graph from a freshly reloaded
//! config (reusing a site's in-memory state when `PastieSite.is_same_as`
//! says it's unchanged), SIGUSR1 dumps queue sizes, and stopping joins every
//! task with a timeout of `max(1s, max_throttling_ms / 1000)`. Signal
//! handling itself uses `tokio::signal::unix`, the idiomatic async
//! replacement for Python's `signal.signal` handlers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigError};
use crate::fetcher::{FetchJob, spawn_workers};
use crate::notify::{EmailNotifier, Notifier};
use crate::pattern::PatternSet;
use crate::proxy::ProxyList;
use crate::site::{PastieSite, SeenRing};
use crate::storage::file::FileStorage;
use crate::storage::mongo::{MongoSaveProfile, MongoStorage};
use crate::storage::redis_backend::RedisStorage;
use crate::storage::sqlite::Sqlite3Storage;
use crate::storage::telegram::TelegramStorage;
use crate::storage::{SaveMode, StorageDispatcher};
use crate::throttler::Throttler;
use crate::useragent::UserAgent;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("no site ended up enabled after loading configuration")]
    NoSitesEnabled,
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] std::io::Error),
}

/// One site's running task set plus the state that survives a reload.
struct RunningSite {
    site: Arc<PastieSite>,
    sender: mpsc::Sender<FetchJob>,
    poller: tokio::task::JoinHandle<()>,
    workers: Vec<tokio::task::JoinHandle<()>>,
    seen: Arc<tokio::sync::Mutex<SeenRing>>,
}

/// Everything built from one configuration generation.
struct RunningConfig {
    sites: Vec<RunningSite>,
    proxy_watch: Option<tokio::task::JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
    max_throttling_ms: u64,
}

impl RunningConfig {
    async fn stop_and_join(self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let timeout = Duration::from_secs((self.max_throttling_ms / 1000).max(1));
        if let Some(handle) = self.proxy_watch {
            handle.abort();
        }
        for running in self.sites {
            running.poller.abort();
            drop(running.sender);
            for worker in running.workers {
                if tokio::time::timeout(timeout, worker).await.is_err() {
                    warn!("worker did not terminate within timeout, continuing anyway");
                }
            }
        }
    }

    fn site_identities(
        &self,
    ) -> HashMap<String, (crate::site::SiteIdentity, Arc<tokio::sync::Mutex<SeenRing>>)> {
        self.sites
            .iter()
            .map(|s| (s.site.name.clone(), (s.site.identity(), Arc::clone(&s.seen))))
            .collect()
    }
}

/// Owns the configuration path and drives load → run → reload/stop.
pub struct Supervisor {
    config_path: PathBuf,
}

impl Supervisor {
    #[must_use]
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// Runs until a SIGTERM (or the process receives Ctrl-C) asks for
    /// shutdown. Returns once every task has stopped.
    pub async fn run(self) -> Result<(), SupervisorError> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sighup = signal(SignalKind::hangup())?;
        let mut sigusr1 = signal(SignalKind::user_defined1())?;

        let config = crate::config::load_config(&self.config_path)?;
        let mut running = build(&config, None).await?;
        info!(sites = running.sites.len(), "pystemon started");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("SIGTERM received, stopping");
                    running.stop_and_join().await;
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, stopping");
                    running.stop_and_join().await;
                    break;
                }
                _ = sighup.recv() => {
                    info!("SIGHUP received, reloading configuration");
                    match crate::config::load_config(&self.config_path) {
                        Ok(new_config) => {
                            let previous_seen = running.site_identities();
                            match build(&new_config, Some(&previous_seen)).await {
                                Ok(new_running) => {
                                    let old = std::mem::replace(&mut running, new_running);
                                    old.stop_and_join().await;
                                }
                                Err(error) => {
                                    error!(%error, "reload failed, continuing with previous configuration");
                                }
                            }
                        }
                        Err(error) => {
                            error!(%error, "reload failed, continuing with previous configuration");
                        }
                    }
                }
                _ = sigusr1.recv() => {
                    for running_site in &running.sites {
                        debug!(site = %running_site.site.name, "queue stats requested (SIGUSR1)");
                    }
                }
            }
        }
        Ok(())
    }
}

type PreviousSeen = HashMap<String, (crate::site::SiteIdentity, Arc<tokio::sync::Mutex<SeenRing>>)>;

async fn build(
    config: &Config,
    previous_seen: Option<&PreviousSeen>,
) -> Result<RunningConfig, SupervisorError> {
    let stop_flag = Arc::new(AtomicBool::new(false));

    let proxies = config
        .proxy
        .file
        .as_ref()
        .and_then(|path| match ProxyList::load(path) {
            Ok(list) => Some(Arc::new(list)),
            Err(error) => {
                warn!(%error, "failed to load proxy list, continuing without proxies");
                None
            }
        });
    let proxy_watch = proxies.clone().map(|list| {
        let stop_flag = Arc::clone(&stop_flag);
        tokio::spawn(async move { list.watch(stop_flag).await })
    });

    let patterns = Arc::new(
        PatternSet::compile(&config.search).unwrap_or_else(|error| {
            error!(%error, "failed to compile search patterns, continuing with none");
            PatternSet::default()
        }),
    );

    let storage = Arc::new(build_storage(config).await);
    let notifier: Option<Arc<dyn Notifier>> = build_notifier(config).map(|n| Arc::new(n) as _);

    let mut sites = Vec::new();
    for (site_name, site_spec) in &config.site {
        if !site_spec.enable {
            continue;
        }
        let throttler = (site_spec.throttling > 0)
            .then(|| Arc::new(Throttler::new(site_spec.throttling)));

        let site = match PastieSite::new(
            site_name.clone(),
            site_spec.download_url.clone(),
            site_spec.public_url.clone(),
            site_spec.metadata_url.clone(),
            site_spec.archive_url.clone(),
            &site_spec.archive_regex,
            site_spec.update_min,
            site_spec.update_max,
            config
                .storage
                .values()
                .any(|s| s.archive.as_ref().is_some_and(|a| a.compress)),
        ) {
            Ok(site) => Arc::new(site),
            Err(error) => {
                error!(site = %site_name, %error, "invalid archive regex, skipping site");
                continue;
            }
        };

        let ua = match UserAgent::new(proxies.clone(), throttler.clone(), Vec::new()) {
            Ok(ua) => Arc::new(ua),
            Err(error) => {
                error!(site = %site_name, %error, "failed to build HTTP client, skipping site");
                continue;
            }
        };

        let seen = previous_seen
            .and_then(|map| map.get(site_name))
            .filter(|(identity, _)| site.is_same_as(identity))
            .map(|(_, seen)| Arc::clone(seen))
            .unwrap_or_default();

        let (tx, rx) = mpsc::channel(1024);
        let workers = spawn_workers(
            config.threads as usize,
            rx,
            Arc::clone(&site),
            Arc::clone(&ua),
            Arc::clone(&patterns),
            Arc::clone(&storage),
            notifier.clone(),
        );

        let poller = spawn_poller(
            Arc::clone(&site),
            Arc::clone(&ua),
            Arc::clone(&storage),
            Arc::clone(&seen),
            tx.clone(),
            Arc::clone(&stop_flag),
        );

        sites.push(RunningSite {
            site,
            sender: tx,
            poller,
            workers,
            seen,
        });
    }

    if sites.is_empty() {
        return Err(SupervisorError::NoSitesEnabled);
    }

    let max_throttling_ms = config.site.values().map(|s| s.throttling).max().unwrap_or(0);

    Ok(RunningConfig {
        sites,
        proxy_watch,
        stop_flag,
        max_throttling_ms,
    })
}

fn spawn_poller(
    site: Arc<PastieSite>,
    ua: Arc<UserAgent>,
    storage: Arc<StorageDispatcher>,
    seen: Arc<tokio::sync::Mutex<SeenRing>>,
    sender: mpsc::Sender<FetchJob>,
    stop_flag: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while !stop_flag.load(Ordering::SeqCst) {
            let sleep_secs = site.sample_sleep_secs();
            info!(
                site = %site.name,
                sleep_secs,
                "downloading list of new pastes"
            );
            if let Some(ids) = site.fetch_new_ids(&ua).await {
                let fresh = {
                    let seen = seen.lock().await;
                    site.new_pastie_ids(ids, &seen)
                };
                let mut queued = 0;
                for id in fresh {
                    if storage.seen(&site.name, &id).await {
                        continue;
                    }
                    {
                        let mut seen = seen.lock().await;
                        seen.remember(id.clone());
                    }
                    if sender.send(FetchJob { id }).await.is_err() {
                        break;
                    }
                    queued += 1;
                }
                if queued > 0 {
                    info!(site = %site.name, queued, "queued new pasties");
                }
            }
            tokio::time::sleep(Duration::from_secs(sleep_secs)).await;
        }
    })
}

fn extra_str<'a>(extra: &'a HashMap<String, serde_yaml::Value>, key: &str) -> Option<&'a str> {
    extra.get(key).and_then(serde_yaml::Value::as_str)
}

fn extra_u16(extra: &HashMap<String, serde_yaml::Value>, key: &str) -> Option<u16> {
    extra
        .get(key)
        .and_then(serde_yaml::Value::as_u64)
        .and_then(|v| u16::try_from(v).ok())
}

fn extra_i64(extra: &HashMap<String, serde_yaml::Value>, key: &str) -> Option<i64> {
    extra.get(key).and_then(serde_yaml::Value::as_i64)
}

fn extra_bool(extra: &HashMap<String, serde_yaml::Value>, key: &str) -> bool {
    extra.get(key).and_then(serde_yaml::Value::as_bool).unwrap_or(false)
}

fn extra_str_list(extra: &HashMap<String, serde_yaml::Value>, key: &str) -> Vec<String> {
    extra
        .get(key)
        .and_then(serde_yaml::Value::as_sequence)
        .map(|seq| {
            seq.iter()
                .filter_map(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|n| n.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn mongo_save_profile(extra: &HashMap<String, serde_yaml::Value>) -> MongoSaveProfile {
    let profile = extra
        .get("save-profile")
        .and_then(serde_yaml::Value::as_mapping)
        .cloned()
        .unwrap_or_default();
    let flag = |key: &str| {
        profile
            .get(serde_yaml::Value::String(key.to_string()))
            .and_then(serde_yaml::Value::as_bool)
            .unwrap_or(false)
    };
    MongoSaveProfile {
        content_on_miss: flag("content-on-miss"),
        timestamp: flag("timestamp"),
        url: flag("url"),
        site: flag("site"),
        id: flag("id"),
        matched: flag("matched"),
        filename: flag("filename"),
    }
}

async fn build_storage(config: &Config) -> StorageDispatcher {
    let mut dispatcher = StorageDispatcher::new(config.save_thread);
    for (name, spec) in &config.storage {
        let mode = SaveMode::from_flags(spec.save, spec.save_all);
        if mode == SaveMode::Disabled {
            debug!(storage = %name, "skipping disabled storage backend");
            continue;
        }
        match spec.storage_classname.as_str() {
            "FileStorage" => {
                let Some(archive) = &spec.archive else {
                    warn!(storage = %name, "FileStorage requires an archive dir, skipping");
                    continue;
                };
                dispatcher.register(
                    Box::new(FileStorage::new(
                        name.clone(),
                        Some(archive.dir.clone()),
                        archive.dir_all.clone(),
                        archive.compress,
                    )),
                    mode,
                );
            }
            "Sqlite3Storage" => {
                let Some(file) = extra_str(&spec.extra, "file") else {
                    warn!(storage = %name, "Sqlite3Storage requires a 'file' path, skipping");
                    continue;
                };
                let lookup = extra_bool(&spec.extra, "lookup");
                match Sqlite3Storage::connect(name.clone(), std::path::Path::new(file), lookup).await {
                    Ok(backend) => dispatcher.register(Box::new(backend), mode),
                    Err(error) => warn!(storage = %name, %error, "failed to open sqlite storage, skipping"),
                }
            }
            "MongoStorage" => {
                let (Some(url), Some(database), Some(collection)) = (
                    extra_str(&spec.extra, "url"),
                    extra_str(&spec.extra, "database"),
                    extra_str(&spec.extra, "collection"),
                ) else {
                    warn!(storage = %name, "MongoStorage requires url/database/collection, skipping");
                    continue;
                };
                let profile = mongo_save_profile(&spec.extra);
                match MongoStorage::connect(name.clone(), url, database, collection, spec.save_all, profile)
                    .await
                {
                    Ok(backend) => dispatcher.register(Box::new(backend), mode),
                    Err(error) => warn!(storage = %name, %error, "failed to connect to mongodb, skipping"),
                }
            }
            "RedisStorage" => {
                let (Some(server), Some(port)) =
                    (extra_str(&spec.extra, "server"), extra_u16(&spec.extra, "port"))
                else {
                    warn!(storage = %name, "RedisStorage requires server/port, skipping");
                    continue;
                };
                let database = extra_i64(&spec.extra, "database").unwrap_or(0);
                let save_dir = extra_str(&spec.extra, "save_dir").map(str::to_string);
                let archive_dir = extra_str(&spec.extra, "archive_dir").map(str::to_string);
                match RedisStorage::new(
                    name.clone(),
                    server,
                    port,
                    database,
                    save_dir,
                    archive_dir,
                    spec.save_all,
                ) {
                    Ok(backend) => dispatcher.register(Box::new(backend), mode),
                    Err(error) => warn!(storage = %name, %error, "failed to build redis client, skipping"),
                }
            }
            "TelegramStorage" => {
                let Some(token) = extra_str(&spec.extra, "token") else {
                    warn!(storage = %name, "TelegramStorage requires a token, skipping");
                    continue;
                };
                let chat_ids = extra_str_list(&spec.extra, "chat-ids");
                dispatcher.register(Box::new(TelegramStorage::new(name.clone(), token, chat_ids)), mode);
            }
            other => {
                warn!(storage = %name, classname = other, "unknown storage backend classname, skipping");
            }
        }
    }
    dispatcher
}

fn build_notifier(config: &Config) -> Option<EmailNotifier> {
    let email = config.email.as_ref()?;
    match EmailNotifier::new(
        &email.server,
        email.port,
        email.tls,
        email.username.as_deref(),
        email.password.as_deref(),
        email.from.clone(),
        email.to.clone(),
        email.subject.clone(),
        email.size_limit as usize,
    ) {
        Ok(notifier) => Some(notifier),
        Err(error) => {
            warn!(%error, "failed to configure email notifier, alerts disabled");
            None
        }
    }
}
