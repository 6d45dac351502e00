//! Runtime configuration, read from `BUGRELAY_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "~/.bugrelay/bugrelay.db";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_CACHE_ENTRIES: usize = 512;
/// Listing pages churn quickly.
pub const DEFAULT_LISTING_TTL_SECS: u64 = 5 * 60;
pub const DEFAULT_DETAIL_TTL_SECS: u64 = 30 * 60;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackerConfig {
    pub db_path: PathBuf,
    /// How long a writer waits for the database lock before the call fails
    /// with a retryable conflict.
    pub busy_timeout: Duration,
    pub cache_enabled: bool,
    pub cache_max_entries: usize,
    pub listing_ttl: Duration,
    pub detail_ttl: Duration,
}

impl TrackerConfig {
    /// Defaults for a database at `db_path`.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            cache_enabled: true,
            cache_max_entries: DEFAULT_CACHE_ENTRIES,
            listing_ttl: Duration::from_secs(DEFAULT_LISTING_TTL_SECS),
            detail_ttl: Duration::from_secs(DEFAULT_DETAIL_TTL_SECS),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Missing or unparseable
    /// values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("BUGRELAY_DB_PATH")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let mut config = Self::new(db_path);

        if let Some(ms) = parse_number::<u64>(lookup("BUGRELAY_BUSY_TIMEOUT_MS")) {
            config.busy_timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup("BUGRELAY_CACHE") {
            config.cache_enabled = flag_enabled(&raw, true);
        }
        if let Some(entries) = parse_number::<usize>(lookup("BUGRELAY_CACHE_ENTRIES")) {
            config.cache_max_entries = entries.max(1);
        }
        if let Some(secs) = parse_number::<u64>(lookup("BUGRELAY_LISTING_TTL_SECS")) {
            config.listing_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_number::<u64>(lookup("BUGRELAY_DETAIL_TTL_SECS")) {
            config.detail_ttl = Duration::from_secs(secs);
        }
        config
    }

    pub fn without_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }
}

fn parse_number<T: std::str::FromStr>(raw: Option<String>) -> Option<T> {
    raw.and_then(|v| v.trim().parse::<T>().ok())
}

/// Interpret an on/off switch; anything unrecognised keeps `default`.
fn flag_enabled(raw: &str, default: bool) -> bool {
    let v = raw.trim().to_lowercase();
    if matches!(v.as_str(), "0" | "false" | "no" | "off") {
        false
    } else if matches!(v.as_str(), "1" | "true" | "yes" | "on") {
        true
    } else {
        default
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}
