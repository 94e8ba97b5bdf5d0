//! Pystemon Core Library
//!
//! A concurrent paste-site crawler: per-site pollers discover new paste ids,
//! fixed-size worker pools fetch and regex-match their content, and matches
//! are fanned out to storage backends and notifiers.
//!
//! # Architecture
//!
//! - [`config`] - YAML configuration loading and merging
//! - [`proxy`] - Rotating HTTP proxy list with file-watch reload
//! - [`throttler`] - Per-site minimum-interval request throttling
//! - [`useragent`] - HTTP fetch with retry/backoff and user-agent rotation
//! - [`pattern`] - Compiled search/exclude regex pairs
//! - [`pastie`] - A single fetched paste and its match state
//! - [`site`] - A pastie site's archive poller and seen-id ring
//! - [`fetcher`] - Fixed-size worker pool draining one site's fetch queue
//! - [`storage`] - Save/seen backends (file, sqlite, mongo, redis, telegram)
//! - [`notify`] - Email alerting on matches
//! - [`supervisor`] - Process lifecycle: load, run, reload, stop

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod fetcher;
pub mod notify;
pub mod pastie;
pub mod pattern;
pub mod proxy;
pub mod site;
pub mod storage;
pub mod supervisor;
pub mod throttler;
pub mod useragent;

pub use config::{Config, ConfigError, load_config};
pub use fetcher::{FetchJob, spawn_workers};
pub use notify::{EmailNotifier, Notifier, NotifyError};
pub use pastie::Pastie;
pub use pattern::{Pattern, PatternError, PatternSet};
pub use proxy::{ProxyError, ProxyList};
pub use site::{PastieSite, SeenRing, SiteIdentity};
pub use storage::{SaveMode, Storage, StorageDispatcher, StorageError};
pub use supervisor::{Supervisor, SupervisorError};
pub use throttler::Throttler;
pub use useragent::{FetchError, UserAgent};
