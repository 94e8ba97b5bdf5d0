//! YAML configuration loading and merging.
//!
//! Mirrors the external configuration contract: a typed [`Config`] struct
//! deserialized from YAML, with an `includes` list merged in before the
//! top-level file's own keys take precedence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file (or an `includes` entry) could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The YAML could not be deserialized into [`Config`].
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_yaml::Error,
    },

    /// A required key was absent after merge.
    #[error("missing required config key: {0}")]
    Missing(String),
}

impl ConfigError {
    #[must_use]
    pub fn missing(key: impl Into<String>) -> Self {
        Self::Missing(key.into())
    }
}

/// Regex engine selection. Both map onto the `regex` crate; the switch only
/// changes default flags (see `PatternSet`), never the match algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegexEngine {
    /// Default PCRE-like engine, case-insensitive unless overridden.
    #[default]
    Re,
    /// Engine mode with full Unicode property-class support.
    Regex,
}

/// Proxy list configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProxyConfig {
    /// Whether to pick a random proxy per request (always true in practice).
    #[serde(default)]
    pub random: bool,
    /// Path to the newline-delimited proxy file.
    pub file: Option<PathBuf>,
}

/// User-agent pool configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UserAgentConfig {
    /// Whether to pick a random UA string per request.
    #[serde(default)]
    pub random: bool,
    /// Path to the newline-delimited UA file.
    pub file: Option<PathBuf>,
}

/// Network-level settings (source IP binding).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct NetworkConfig {
    /// Source IP address to bind outbound sockets to, if any.
    pub ip: Option<String>,
}

/// Pid-file path, parsed but unused: daemonization (fork + pid-file
/// management) is out of scope for this crate. Kept so a config file
/// written for the original Python daemon still parses cleanly.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PidConfig {
    pub filename: Option<PathBuf>,
}

/// Email notifier settings (§4.13 / §6 Email interface).
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub alert: bool,
    pub from: String,
    /// Global recipient list (comma-separated in YAML, split at load).
    #[serde(default, deserialize_with = "deserialize_comma_list")]
    pub to: Vec<String>,
    #[serde(default = "default_email_subject")]
    pub subject: String,
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Body/attachment split threshold in bytes.
    #[serde(default = "default_size_limit")]
    pub size_limit: u64,
}

fn default_email_subject() -> String {
    "[pystemon] match found".to_string()
}

fn default_smtp_port() -> u16 {
    25
}

fn default_size_limit() -> u64 {
    1024 * 1024
}

fn deserialize_comma_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default())
}

/// One pattern spec as written under the top-level `search` key.
#[derive(Debug, Clone, Deserialize)]
pub struct PatternSpec {
    pub search: String,
    pub exclude: Option<String>,
    pub count: Option<i64>,
    pub description: Option<String>,
    #[serde(rename = "regex-flags")]
    pub regex_flags: Option<String>,
    #[serde(default, deserialize_with = "deserialize_comma_list")]
    pub to: Vec<String>,
    /// Arbitrary extra keys carried through to storage, same as the
    /// Python original's `PastieSearch.extra`.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_yaml::Value>,
}

/// FileStorage's mandatory `archive` anchor.
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    pub dir: PathBuf,
    #[serde(rename = "dir-all")]
    pub dir_all: Option<PathBuf>,
    #[serde(default)]
    pub compress: bool,
}

/// One `storage.<name>` entry. Backend-specific keys are carried in `extra`
/// and interpreted by the matching backend constructor (`§9` registry).
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSpec {
    #[serde(default = "default_true")]
    pub save: bool,
    #[serde(rename = "save-all", default)]
    pub save_all: bool,
    #[serde(rename = "storage-classname")]
    pub storage_classname: String,
    pub archive: Option<ArchiveConfig>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_yaml::Value>,
}

fn default_true() -> bool {
    true
}

/// One `site.<name>` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteSpec {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(rename = "download-url")]
    pub download_url: String,
    #[serde(rename = "archive-url")]
    pub archive_url: String,
    #[serde(rename = "archive-regex")]
    pub archive_regex: String,
    #[serde(rename = "public-url")]
    pub public_url: Option<String>,
    #[serde(rename = "metadata-url")]
    pub metadata_url: Option<String>,
    #[serde(rename = "update-min", default = "default_update_min")]
    pub update_min: u64,
    #[serde(rename = "update-max", default = "default_update_max")]
    pub update_max: u64,
    #[serde(rename = "pastie-classname")]
    pub pastie_classname: Option<String>,
    #[serde(default)]
    pub throttling: u64,
}

fn default_update_min() -> u64 {
    300
}

fn default_update_max() -> u64 {
    600
}

/// Top-level configuration, as loaded from YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_threads")]
    pub threads: u32,
    #[serde(default)]
    pub engine: RegexEngine,
    #[serde(rename = "strict_regex", default)]
    pub strict_regex: bool,
    #[serde(rename = "save-thread", default)]
    pub save_thread: bool,
    #[serde(rename = "logging-level")]
    pub logging_level: Option<String>,
    #[serde(default)]
    pub pid: PidConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
    pub email: Option<EmailConfig>,
    #[serde(default)]
    pub storage: HashMap<String, StorageSpec>,
    #[serde(default)]
    pub search: Vec<PatternSpec>,
    #[serde(default)]
    pub site: HashMap<String, SiteSpec>,
    #[serde(default)]
    pub includes: Vec<PathBuf>,
}

fn default_threads() -> u32 {
    1
}

/// Loads and validates configuration at `path`, merging any `includes`
/// depth-first before the top-level file's own keys take precedence
/// (matching the documented reload/merge order).
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = read_yaml_value(path)?;
    let merged = merge_includes(path, raw)?;
    let config: Config =
        serde_yaml::from_value(merged).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    validate(&config)?;
    Ok(config)
}

fn read_yaml_value(path: &Path) -> Result<serde_yaml::Value, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Merges any `includes:` entries from `value` into `value` itself, included
/// files applied first so the top-level file's own keys win on conflict.
fn merge_includes(
    base_path: &Path,
    mut value: serde_yaml::Value,
) -> Result<serde_yaml::Value, ConfigError> {
    let includes: Vec<PathBuf> = value
        .get("includes")
        .and_then(|v| v.as_sequence())
        .map(|seq| {
            seq.iter()
                .filter_map(|entry| entry.as_str().map(PathBuf::from))
                .collect()
        })
        .unwrap_or_default();

    let base_dir = base_path.parent().unwrap_or_else(|| Path::new("."));
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
    for include in includes {
        let include_path = if include.is_absolute() {
            include
        } else {
            base_dir.join(include)
        };
        let included = read_yaml_value(&include_path)?;
        let included = merge_includes(&include_path, included)?;
        merge_mapping(&mut merged, included);
    }
    merge_mapping(&mut merged, value.take());
    Ok(merged)
}

/// Shallow top-level merge with nested-mapping recursion; scalar/sequence
/// values in `overlay` replace those in `base`.
fn merge_mapping(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    let (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(overlay_map)) =
        (base, overlay)
    else {
        return;
    };
    for (key, overlay_value) in overlay_map {
        match base_map.get_mut(&key) {
            Some(existing @ serde_yaml::Value::Mapping(_))
                if matches!(overlay_value, serde_yaml::Value::Mapping(_)) =>
            {
                merge_mapping(existing, overlay_value);
            }
            _ => {
                base_map.insert(key, overlay_value);
            }
        }
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.threads < 1 {
        return Err(ConfigError::missing("threads >= 1"));
    }
    for (name, site) in &config.site {
        if site.update_min > site.update_max {
            return Err(ConfigError::Missing(format!(
                "site.{name}: update-min must be <= update-max"
            )));
        }
    }
    for (name, storage) in &config.storage {
        if storage.storage_classname.eq_ignore_ascii_case("filestorage") && storage.archive.is_none()
        {
            return Err(ConfigError::missing(format!("storage.{name}.archive")));
        }
    }
    Ok(())
}

/// Default config-file discovery order when no `-c` flag is given.
#[must_use]
pub fn default_config_search_paths(program_stem: &str) -> Vec<PathBuf> {
    vec![
        PathBuf::from("/etc/pystemon.yaml"),
        PathBuf::from("./pystemon.yaml"),
        PathBuf::from(format!("./{program_stem}.yaml")),
    ]
}
