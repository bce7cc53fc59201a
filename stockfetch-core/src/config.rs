//! Fetch configuration.
//!
//! Loaded from an optional TOML file, then overridden from the environment.
//! Every field has a default, so an empty file (or none at all) plus an
//! `ALPHA_VANTAGE_API_KEY` is a complete configuration.

use crate::fetcher::{ProviderMarkers, RetryPolicy, DEFAULT_BASE_URL};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const API_KEY_ENV: &str = "ALPHA_VANTAGE_API_KEY";
pub const CACHE_DIR_ENV: &str = "STOCKFETCH_CACHE_DIR";

/// Value shipped in sample `.env` files; never a real key.
const PLACEHOLDER_API_KEY: &str = "your_api_key_here";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no API key configured; set ALPHA_VANTAGE_API_KEY or api_key in the config file")]
    MissingApiKey,

    #[error("API key is still the placeholder value; set a real key in ALPHA_VANTAGE_API_KEY")]
    PlaceholderApiKey,

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything needed to build a data client.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub cache_dir: PathBuf,
    pub default_ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub jitter: bool,
    /// Local per-day request budget; `None` disables local counting.
    pub daily_quota: Option<u32>,
    pub markers: ProviderMarkers,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            cache_dir: default_cache_dir(),
            default_ttl_secs: 24 * 60 * 60,
            request_timeout_secs: 10,
            max_attempts: 3,
            base_delay_ms: 1000,
            jitter: false,
            daily_quota: None,
            markers: ProviderMarkers::default(),
        }
    }
}

impl fmt::Debug for FetchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("cache_dir", &self.cache_dir)
            .field("default_ttl_secs", &self.default_ttl_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_attempts", &self.max_attempts)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("jitter", &self.jitter)
            .field("daily_quota", &self.daily_quota)
            .field("markers", &self.markers)
            .finish()
    }
}

impl FetchConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(self) -> Self {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`; empty values are ignored.
    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(key) = non_empty(API_KEY_ENV) {
            self.api_key = Some(key.trim().to_string());
        }
        if let Some(dir) = non_empty(CACHE_DIR_ENV) {
            self.cache_dir = PathBuf::from(dir);
        }
        self
    }

    /// The configured API key, rejecting missing and placeholder values.
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        match self.api_key.as_deref().map(str::trim) {
            None | Some("") => Err(ConfigError::MissingApiKey),
            Some(PLACEHOLDER_API_KEY) => Err(ConfigError::PlaceholderApiKey),
            Some(key) => Ok(key),
        }
    }

    /// Check everything except the API key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("base_url is empty".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be positive".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        let markers = &self.markers;
        if markers
            .invalid_symbol
            .iter()
            .chain(&markers.rate_limit)
            .any(|m| m.field.is_empty())
        {
            return Err(ConfigError::Invalid(
                "marker field names must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            jitter: self.jitter,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// Platform cache directory, or `.cache/stock_data` when there is none.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("stockfetch"))
        .unwrap_or_else(|| PathBuf::from(".cache").join("stock_data"))
}
