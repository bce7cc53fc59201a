//! stockfetch core: cache-backed, retrying time-series fetches for a
//! rate-limited market-data provider.
//!
//! - Query model and deterministic cache keys
//! - File-backed response cache with per-entry TTL and atomic writes
//! - Resilient fetcher: timeout, bounded exponential backoff, provider markers
//! - Daily request quota and cooperative cancellation
//! - Data client composing cache and fetcher

pub mod cache;
pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod key;
pub mod query;
pub mod quota;
pub mod series;
pub mod transport;

pub use cache::{CacheEntry, CacheError, CacheLookup, CacheStats, CacheStore};
pub use cancel::CancelToken;
pub use client::{DataClient, FetchPhase, DEFAULT_TTL};
pub use config::{ConfigError, FetchConfig};
pub use error::{FailureKind, FetchError, FetchOutcome};
pub use fetcher::{
    FetchedPayload, MarkerRule, ProviderMarkers, ResilientFetcher, RetryPolicy, SeriesFetcher,
    Sleeper, ThreadSleeper,
};
pub use key::{derive, CacheKey};
pub use query::{Interval, OutputSize, Query, SeriesFunction};
pub use quota::RequestQuota;
pub use series::{InvalidDateRange, OhlcvRecord, Series};
pub use transport::{HttpResponse, HttpTransport, Transport, TransportError};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: the client and its parts can move to a worker thread.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<DataClient>();
        require_sync::<DataClient>();
        require_send::<ResilientFetcher>();
        require_sync::<ResilientFetcher>();
        require_send::<CacheStore>();
        require_sync::<CacheStore>();
        require_send::<RequestQuota>();
        require_sync::<RequestQuota>();
        require_send::<Series>();
        require_sync::<Series>();
        require_send::<FetchError>();
        require_sync::<FetchError>();
    }
}
