//! A pastie site's archive poller: periodically fetches the site's "recent
//! pastes" index, extracts ids with a regex, and hands back the ones not
//! already seen.
//!
//! Grounded on `original_source/pystemon/pastiesite.py`'s `PastieSite`: the
//! `run()` loop sleeps a random duration in `[update_min, update_max]`
//! between polls, `get_last_pasties` regex-extracts ids from the archive
//! page and filters them through `seen_pastie_and_remember`, and
//! `is_same_as` lets a config reload decide whether to keep a site's queue
//! and seen-ring rather than rebuild them.

use std::collections::{HashSet, VecDeque};

use rand::Rng;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::useragent::UserAgent;

/// Capacity of the in-memory seen-id ring (`deque('', 1000)` in the
/// original).
pub const SEEN_RING_CAPACITY: usize = 1000;

/// Bounded FIFO of recently seen pastie ids with O(1) membership testing.
/// Older ids fall off once the ring is full; long-term dedup is the job of
/// a storage backend's `seen_pastie`, not this ring.
#[derive(Default)]
pub struct SeenRing {
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl SeenRing {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// Records `id` as seen, evicting the oldest entry once at capacity.
    /// No-op if already present.
    pub fn remember(&mut self, id: impl Into<String>) {
        let id = id.into();
        if self.members.contains(&id) {
            return;
        }
        if self.order.len() >= SEEN_RING_CAPACITY
            && let Some(evicted) = self.order.pop_back()
        {
            self.members.remove(&evicted);
        }
        self.order.push_front(id.clone());
        self.members.insert(id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Identity used to decide, across a config reload, whether a site is "the
/// same" and should keep its in-memory queue/seen-ring rather than being
/// torn down and recreated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteIdentity {
    pub name: String,
    pub download_url: String,
    pub archive_url: String,
    pub metadata_url: Option<String>,
}

/// A pastie site's polling configuration and archive-extraction logic.
pub struct PastieSite {
    pub name: String,
    pub download_url: String,
    pub public_url: String,
    pub metadata_url: Option<String>,
    pub archive_url: String,
    archive_regex: Regex,
    pub update_min: u64,
    pub update_max: u64,
    pub compress_filenames: bool,
}

impl PastieSite {
    pub fn new(
        name: impl Into<String>,
        download_url: impl Into<String>,
        public_url: Option<String>,
        metadata_url: Option<String>,
        archive_url: impl Into<String>,
        archive_regex: &str,
        update_min: u64,
        update_max: u64,
        compress_filenames: bool,
    ) -> Result<Self, regex::Error> {
        let download_url = download_url.into();
        let public_url = public_url.unwrap_or_else(|| download_url.clone());
        Ok(Self {
            name: name.into(),
            download_url,
            public_url,
            metadata_url,
            archive_url: archive_url.into(),
            archive_regex: Regex::new(archive_regex)?,
            update_min,
            update_max,
            compress_filenames,
        })
    }

    #[must_use]
    pub fn identity(&self) -> SiteIdentity {
        SiteIdentity {
            name: self.name.clone(),
            download_url: self.download_url.clone(),
            archive_url: self.archive_url.clone(),
            metadata_url: self.metadata_url.clone(),
        }
    }

    /// `true` iff `self` and `other` share the identity fields a reload uses
    /// to decide whether to preserve in-memory state.
    #[must_use]
    pub fn is_same_as(&self, other: &SiteIdentity) -> bool {
        self.identity() == *other
    }

    /// A pastie id's on-disk filename: `/` replaced with `_`, `.gz` suffix
    /// appended when the site archives compressed.
    #[must_use]
    pub fn pastie_id_to_filename(&self, pastie_id: &str) -> String {
        let filename = pastie_id.replace('/', "_");
        if self.compress_filenames {
            format!("{filename}.gz")
        } else {
            filename
        }
    }

    /// Uniformly samples a sleep duration in `[update_min, update_max]`
    /// seconds, as the polling loop does between archive fetches.
    #[must_use]
    pub fn sample_sleep_secs(&self) -> u64 {
        if self.update_min >= self.update_max {
            return self.update_min;
        }
        rand::thread_rng().gen_range(self.update_min..=self.update_max)
    }

    /// Fetches the archive index and extracts pastie ids via the site's
    /// regex, in the order they appear on the page.
    pub async fn fetch_new_ids(&self, ua: &UserAgent) -> Option<Vec<String>> {
        let body = match ua.download_url(&self.archive_url).await {
            Ok(body) => body,
            Err(error) => {
                warn!(site = %self.name, %error, "failed to download archive page");
                return None;
            }
        };
        let html = String::from_utf8_lossy(&body);
        let ids: Vec<String> = self
            .archive_regex
            .captures_iter(&html)
            .filter_map(|captures| captures.get(1).map(|m| m.as_str().to_string()))
            .collect();
        if ids.is_empty() {
            warn!(site = %self.name, "no archive matches; regex may be stale");
            return None;
        }
        debug!(site = %self.name, count = ids.len(), "extracted archive ids");
        Some(ids)
    }

    /// Filters `ids` through `seen` without recording anything into it — an
    /// id is only worth remembering once a storage backend also confirms
    /// it's novel, which the caller checks afterwards (see
    /// `Supervisor::spawn_poller`). Reverses the remainder so the oldest
    /// unseen entries are queued first — new pastebin listings read
    /// newest-first.
    #[must_use]
    pub fn new_pastie_ids(&self, ids: Vec<String>, seen: &SeenRing) -> Vec<String> {
        let mut fresh: Vec<String> = ids.into_iter().filter(|id| !seen.contains(id)).collect();
        fresh.reverse();
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> PastieSite {
        PastieSite::new(
            "pastebin",
            "https://pastebin.com/raw/{id}",
            None,
            None,
            "https://pastebin.com/archive",
            r#"href="/(\w{8})""#,
            1,
            2,
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_seen_ring_dedup_and_eviction() {
        let mut ring = SeenRing::new();
        ring.remember("a");
        ring.remember("a");
        assert_eq!(ring.len(), 1, "duplicate remember must not grow the ring");
        assert!(ring.contains("a"));
        assert!(!ring.contains("b"));
    }

    #[test]
    fn test_seen_ring_evicts_oldest_at_capacity() {
        let mut ring = SeenRing::new();
        for i in 0..SEEN_RING_CAPACITY {
            ring.remember(format!("id-{i}"));
        }
        assert!(ring.contains("id-0"));
        ring.remember("id-overflow");
        assert!(!ring.contains("id-0"), "oldest id should be evicted");
        assert!(ring.contains("id-overflow"));
        assert_eq!(ring.len(), SEEN_RING_CAPACITY);
    }

    #[test]
    fn test_is_same_as_compares_identity_fields() {
        let s = site();
        assert!(s.is_same_as(&s.identity()));
        let mut other = s.identity();
        other.archive_url = "https://pastebin.com/archive2".to_string();
        assert!(!s.is_same_as(&other));
    }

    #[test]
    fn test_pastie_id_to_filename_sanitizes_and_suffixes() {
        let mut s = site();
        assert_eq!(s.pastie_id_to_filename("ab/cd"), "ab_cd");
        s.compress_filenames = true;
        assert_eq!(s.pastie_id_to_filename("ab/cd"), "ab_cd.gz");
    }

    #[test]
    fn test_new_pastie_ids_filters_seen_and_reverses() {
        let s = site();
        let mut seen = SeenRing::new();
        seen.remember("aaaaaaaa");
        let ids = vec![
            "cccccccc".to_string(),
            "bbbbbbbb".to_string(),
            "aaaaaaaa".to_string(),
        ];
        let fresh = s.new_pastie_ids(ids, &seen);
        assert_eq!(fresh, vec!["bbbbbbbb".to_string(), "cccccccc".to_string()]);
        assert!(
            !seen.contains("bbbbbbbb") && !seen.contains("cccccccc"),
            "new_pastie_ids must not record anything on its own"
        );
    }

    #[test]
    fn test_sample_sleep_within_bounds() {
        let s = site();
        for _ in 0..50 {
            let secs = s.sample_sleep_secs();
            assert!(secs >= s.update_min && secs <= s.update_max);
        }
    }
}
