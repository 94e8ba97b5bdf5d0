//! Compiled regex match rules with count/exclude/description/routing metadata.
//!
//! Grounded on `original_source/pystemon/pastiesearch.py`'s `PastieSearch`:
//! compile search + optional exclude regex, an optional minimum hit count,
//! an optional human description, an optional extra recipient list, and a
//! free-form `extra` map carried through to storage.

use std::collections::HashMap;

use regex::bytes::Regex;
use thiserror::Error;

use crate::config::PatternSpec;

/// Errors compiling a pattern's regexes.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("invalid search regex '{pattern}': {source}")]
    Search {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid exclude regex '{pattern}': {source}")]
    Exclude {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// One compiled match rule. Immutable after construction; a config reload
/// replaces the whole [`PatternSet`] atomically rather than mutating rules.
pub struct Pattern {
    search_text: String,
    search: Regex,
    exclude_text: Option<String>,
    exclude: Option<Regex>,
    /// Minimum hit count; `None` means "any" (the source's `-1` sentinel).
    count: Option<usize>,
    description: Option<String>,
    to: Vec<String>,
    extra: HashMap<String, serde_yaml::Value>,
}

impl Pattern {
    /// Compiles a pattern from its config spec.
    pub fn compile(spec: &PatternSpec) -> Result<Self, PatternError> {
        // No regex-flags key: case-insensitive by default (the original's
        // `engine.IGNORECASE` fallback). Explicit regex-flags: honor what it
        // asks for instead of overriding it.
        let case_insensitive = spec
            .regex_flags
            .as_deref()
            .map_or(true, |flags| flags.contains("CASE") || flags.contains("S"));
        let search = build_regex(&spec.search, case_insensitive).map_err(|source| {
            PatternError::Search {
                pattern: spec.search.clone(),
                source,
            }
        })?;
        let exclude = spec
            .exclude
            .as_ref()
            .map(|pattern| {
                build_regex(pattern, case_insensitive).map_err(|source| PatternError::Exclude {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .transpose()?;

        Ok(Self {
            search_text: spec.search.clone(),
            search,
            exclude_text: spec.exclude.clone(),
            exclude,
            count: spec.count.map(|count| count.max(-1)).and_then(|count| {
                if count < 0 { None } else { Some(count as usize) }
            }),
            description: spec.description.clone(),
            to: spec.to.clone(),
            extra: spec.extra.clone(),
        })
    }

    /// `true` iff `search` has at least `max(1, count)` hits in `content`,
    /// and (no exclude, or exclude does not match anywhere).
    #[must_use]
    pub fn matches(&self, content: &[u8]) -> bool {
        let required = self.count.unwrap_or(1).max(1);
        let hits = self.search.find_iter(content).take(required).count();
        if hits < required {
            return false;
        }
        if let Some(exclude) = &self.exclude
            && exclude.is_match(content)
        {
            return false;
        }
        true
    }

    /// Human label: description if set, else the raw search pattern.
    #[must_use]
    pub fn to_text(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.search_text)
    }

    /// The raw search regex text.
    #[must_use]
    pub fn to_regex(&self) -> &str {
        &self.search_text
    }

    /// Extra per-match notification recipients (comma-split at config load).
    #[must_use]
    pub fn recipients(&self) -> &[String] {
        &self.to
    }

    /// Dictionary form surfaced to storage backends.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_yaml::Value> {
        let mut dict = self.extra.clone();
        dict.insert(
            "search".to_string(),
            serde_yaml::Value::String(self.search_text.clone()),
        );
        if let Some(description) = &self.description {
            dict.insert(
                "description".to_string(),
                serde_yaml::Value::String(description.clone()),
            );
        }
        if let Some(exclude) = &self.exclude_text {
            dict.insert(
                "exclude".to_string(),
                serde_yaml::Value::String(exclude.clone()),
            );
        }
        if let Some(count) = self.count {
            dict.insert(
                "count".to_string(),
                serde_yaml::Value::Number(count.into()),
            );
        }
        dict
    }
}

fn build_regex(pattern: &str, case_insensitive: bool) -> Result<Regex, regex::Error> {
    if case_insensitive {
        regex::bytes::RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
    } else {
        Regex::new(pattern)
    }
}

/// The immutable, compiled collection of match rules in effect for the
/// current configuration generation.
#[derive(Default)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
}

impl PatternSet {
    /// Compiles every rule in `specs`, failing on the first invalid regex.
    pub fn compile(specs: &[PatternSpec]) -> Result<Self, PatternError> {
        let patterns = specs
            .iter()
            .map(Pattern::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Returns every pattern that matches `content`, in rule order.
    #[must_use]
    pub fn matching<'a>(&'a self, content: &[u8]) -> Vec<&'a Pattern> {
        self.patterns
            .iter()
            .filter(|pattern| pattern.matches(content))
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }
}
