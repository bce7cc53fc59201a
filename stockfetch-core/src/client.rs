//! Cache-backed data client.
//!
//! `get_series`: derive key → fresh cache entry? → otherwise fetch → store → return.
//! The cache is written only after a fully successful fetch, so a failed or
//! interrupted call leaves it untouched.

use crate::cache::CacheStore;
use crate::config::{ConfigError, FetchConfig};
use crate::error::{FetchError, FetchOutcome};
use crate::fetcher::{ResilientFetcher, SeriesFetcher};
use crate::key::{derive, CacheKey};
use crate::query::Query;
use crate::quota::RequestQuota;
use crate::series::{decode_payload, Series};
use crate::transport::HttpTransport;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

/// Default lifetime of a cached response: one day.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Steps of one `get_series` call, as recorded in trace logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    NotStarted,
    CacheLookup,
    CacheHit,
    CacheMiss,
    Fetching,
    Success,
    Failure,
}

/// Composition root over a [`CacheStore`] and a [`SeriesFetcher`].
#[derive(Debug)]
pub struct DataClient<F: SeriesFetcher = ResilientFetcher> {
    cache: CacheStore,
    fetcher: F,
    default_ttl: Duration,
}

impl DataClient<ResilientFetcher> {
    /// Production client: blocking HTTP transport, quota and retry policy from `config`.
    ///
    /// Fails on a missing or placeholder API key before any request is made.
    pub fn from_config(config: &FetchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let api_key = config.api_key()?;
        let transport = HttpTransport::new(config.request_timeout())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let fetcher = ResilientFetcher::new(Arc::new(transport), api_key)
            .with_base_url(config.base_url.clone())
            .with_retry(config.retry_policy())
            .with_markers(config.markers.clone())
            .with_quota(Arc::new(RequestQuota::new(config.daily_quota)));

        Ok(Self::new(CacheStore::new(&config.cache_dir), fetcher)
            .with_default_ttl(config.default_ttl()))
    }
}

impl<F: SeriesFetcher> DataClient<F> {
    pub fn new(cache: CacheStore, fetcher: F) -> Self {
        Self {
            cache,
            fetcher,
            default_ttl: DEFAULT_TTL,
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Rows for `query`, from a fresh cache entry when one exists.
    #[instrument(skip_all, fields(query = %query))]
    pub fn get_series(&self, query: &Query) -> FetchOutcome {
        trace!(phase = ?FetchPhase::NotStarted);
        let key = derive(query)?;

        trace!(phase = ?FetchPhase::CacheLookup, key = %key);
        if let Some(series) = self.cached(&key, query) {
            debug!(phase = ?FetchPhase::CacheHit, rows = series.len(), "serving from cache");
            return Ok(series);
        }

        debug!(phase = ?FetchPhase::CacheMiss, "cache miss");
        self.fetch_and_store(&key, query)
    }

    /// Fetch `query` from the provider even if a fresh entry exists.
    /// The cache is still updated on success.
    #[instrument(skip_all, fields(query = %query))]
    pub fn refresh(&self, query: &Query) -> FetchOutcome {
        let key = derive(query)?;
        self.fetch_and_store(&key, query)
    }

    /// A fresh entry whose payload still decodes; anything else is a miss.
    fn cached(&self, key: &CacheKey, query: &Query) -> Option<Series> {
        let entry = self.cache.get(key)?;
        if !self.cache.is_fresh(&entry, Utc::now()) {
            debug!(key = %key, stored_at = %entry.stored_at, "cache entry is stale");
            return None;
        }
        match decode_payload(&entry.payload, query) {
            Ok(rows) => Some(Series::new(rows, true)),
            Err(e) => {
                warn!(key = %key, error = %e, "cached payload no longer decodes");
                None
            }
        }
    }

    fn fetch_and_store(&self, key: &CacheKey, query: &Query) -> Result<Series, FetchError> {
        trace!(phase = ?FetchPhase::Fetching);
        let payload = match self.fetcher.fetch(query) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(phase = ?FetchPhase::Failure, error = %e, "fetch failed");
                return Err(e);
            }
        };

        if let Err(e) = self.cache.put(key, &payload.raw, self.default_ttl) {
            warn!(key = %key, error = %e, "failed to write cache entry");
        }

        trace!(phase = ?FetchPhase::Success, rows = payload.rows.len());
        Ok(Series::new(payload.rows, false))
    }
}
