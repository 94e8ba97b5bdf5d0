//! A single fetched item from a pastie site: fetch, hash, match, and the
//! record of what happened, ready for storage and notification.
//!
//! Grounded on `original_source/pystemon/pastie.py`'s `Pastie`:
//! `fetch_and_process_pastie` runs fetch → hash → search → save → alert,
//! logging and continuing at each stage rather than aborting the whole
//! pipeline on one pastie's failure. The Rust version splits that single
//! method into `fetch`, `hash`, and `find_matches` so the caller (the
//! fetcher pool, per `src/fetcher.rs`) owns the save/alert decisions instead
//! of the value object reaching back into global state.

use tracing::{debug, info, instrument, warn};

use crate::pattern::PatternSet;
use crate::useragent::{FetchError, UserAgent};

/// One pattern that matched this pastie's content, detached from the
/// [`crate::pattern::Pattern`] borrow so it can outlive the match pass.
#[derive(Debug, Clone)]
pub struct MatchSummary {
    pub text: String,
    pub regex: String,
    pub recipients: Vec<String>,
}

/// A single archived item identified by a site-specific id.
#[derive(Clone)]
pub struct Pastie {
    pub site_name: String,
    pub id: String,
    pub url: String,
    pub public_url: String,
    pub metadata_url: Option<String>,
    pub filename: String,
    pub content: Option<Vec<u8>>,
    pub metadata: Option<Vec<u8>>,
    pub md5: Option<String>,
    pub matches: Vec<MatchSummary>,
}

impl Pastie {
    /// Builds a pastie from its site's URL templates. `{id}` in each
    /// template is replaced with the pastie's id.
    #[must_use]
    pub fn new(
        site_name: impl Into<String>,
        id: impl Into<String>,
        download_url_template: &str,
        public_url_template: &str,
        metadata_url_template: Option<&str>,
        filename: impl Into<String>,
    ) -> Self {
        let id = id.into();
        let url = download_url_template.replace("{id}", &id);
        let public_url = public_url_template.replace("{id}", &id);
        let metadata_url = metadata_url_template.map(|tpl| tpl.replace("{id}", &id));
        Self {
            site_name: site_name.into(),
            id,
            url,
            public_url,
            metadata_url,
            filename: filename.into(),
            content: None,
            metadata: None,
            md5: None,
            matches: Vec::new(),
        }
    }

    /// Fetches content (and metadata, if the site exposes a metadata URL).
    /// Metadata failures are logged and ignored; a content failure is
    /// propagated since there is nothing left to process.
    #[instrument(skip(self, ua), fields(site = %self.site_name, id = %self.id))]
    pub async fn fetch(&mut self, ua: &UserAgent) -> Result<(), FetchError> {
        if let Some(metadata_url) = &self.metadata_url {
            match ua.download_url(metadata_url).await {
                Ok(body) => self.metadata = Some(body),
                Err(error) => warn!(%error, "failed to fetch pastie metadata, continuing"),
            }
        }
        let started = std::time::Instant::now();
        let body = ua.download_url(&self.url).await?;
        if body.is_empty() {
            return Err(FetchError::EmptyContent {
                url: self.url.clone(),
            });
        }
        debug!(bytes = body.len(), elapsed = ?started.elapsed(), "fetched pastie");
        self.content = Some(body);
        Ok(())
    }

    /// Computes the content's md5 hex digest, storing it on the pastie.
    /// No-op if content hasn't been fetched.
    pub fn hash(&mut self) {
        if let Some(content) = &self.content {
            let digest = md5::compute(content);
            self.md5 = Some(format!("{digest:x}"));
        }
    }

    /// Runs every configured pattern against the fetched content, recording
    /// the ones that hit. Returns `true` if anything matched.
    #[instrument(skip(self, patterns), fields(site = %self.site_name, id = %self.id))]
    pub fn find_matches(&mut self, patterns: &PatternSet) -> bool {
        let Some(content) = &self.content else {
            return false;
        };
        self.matches = patterns
            .matching(content)
            .into_iter()
            .map(|pattern| MatchSummary {
                text: pattern.to_text().to_string(),
                regex: pattern.to_regex().to_string(),
                recipients: pattern.recipients().to_vec(),
            })
            .collect();
        if !self.matches.is_empty() {
            info!(
                matches = %self.matches_to_text(),
                url = %self.public_url,
                "match found"
            );
        }
        !self.matches.is_empty()
    }

    #[must_use]
    pub fn matched(&self) -> bool {
        !self.matches.is_empty()
    }

    /// `[desc1, desc2]`-style summary for log lines and alert subjects.
    #[must_use]
    pub fn matches_to_text(&self) -> String {
        if self.matches.is_empty() {
            return String::new();
        }
        let joined = self
            .matches
            .iter()
            .map(|m| m.text.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!("[{joined}]")
    }

    /// Union of every matched pattern's extra recipients, deduplicated.
    #[must_use]
    pub fn alert_recipients(&self) -> Vec<String> {
        let mut recipients: Vec<String> = self
            .matches
            .iter()
            .flat_map(|m| m.recipients.iter().cloned())
            .collect();
        recipients.sort();
        recipients.dedup();
        recipients
    }
}
