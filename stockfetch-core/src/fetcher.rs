//! Resilient fetcher for the time-series provider.
//!
//! One [`SeriesFetcher::fetch`] call issues up to `max_attempts` HTTP requests.
//! Only timeouts and network failures are retried, with exponential backoff.
//! Rate-limit and invalid-symbol conditions arrive inside HTTP 200 bodies and
//! are recognized through configurable [`ProviderMarkers`].

use crate::cancel::CancelToken;
use crate::error::FetchError;
use crate::query::Query;
use crate::quota::RequestQuota;
use crate::series::{decode_object, OhlcvRecord};
use crate::transport::{HttpResponse, Transport, TransportError};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co/query";

// ── Retry policy ────────────────────────────────────────────────────

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Add up to 20% random extra delay to each wait.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Wait before attempt `attempt` (1-based): zero for the first,
    /// `base_delay * 2^(attempt-2)` afterwards.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 2).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        if self.jitter {
            let max_extra = (delay.as_millis() / 5) as u64;
            delay + Duration::from_millis(rand::thread_rng().gen_range(0..=max_extra))
        } else {
            delay
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Blocking wait between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

// ── Provider markers ────────────────────────────────────────────────

/// A top-level JSON field whose presence (optionally with a value containing
/// `contains`, case-insensitively) identifies a provider condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerRule {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
}

impl MarkerRule {
    pub fn field(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            contains: None,
        }
    }

    pub fn field_containing(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            contains: Some(needle.into()),
        }
    }

    /// The matched field's text, if this rule matches `body`.
    fn matches(&self, body: &Map<String, Value>) -> Option<String> {
        let value = body.get(&self.field)?;
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match &self.contains {
            Some(needle) if !text.to_lowercase().contains(&needle.to_lowercase()) => None,
            _ => Some(text),
        }
    }
}

/// Rules recognizing conditions the provider reports inside 200 responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMarkers {
    pub invalid_symbol: Vec<MarkerRule>,
    pub rate_limit: Vec<MarkerRule>,
}

impl Default for ProviderMarkers {
    /// Alpha Vantage conventions.
    fn default() -> Self {
        Self {
            invalid_symbol: vec![MarkerRule::field("Error Message")],
            rate_limit: vec![
                MarkerRule::field("Note"),
                MarkerRule::field_containing("Information", "rate limit"),
            ],
        }
    }
}

impl ProviderMarkers {
    fn invalid_symbol(&self, body: &Map<String, Value>) -> Option<String> {
        self.invalid_symbol.iter().find_map(|r| r.matches(body))
    }

    fn rate_limit(&self, body: &Map<String, Value>) -> Option<String> {
        self.rate_limit.iter().find_map(|r| r.matches(body))
    }
}

// ── Fetcher ─────────────────────────────────────────────────────────

/// A successful fetch: the body as received and its decoded rows.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPayload {
    pub raw: String,
    pub rows: Vec<OhlcvRecord>,
}

/// Anything that can produce a series for a query.
///
/// The data client sits above this trait; fetchers know nothing about the cache.
pub trait SeriesFetcher {
    fn fetch(&self, query: &Query) -> Result<FetchedPayload, FetchError>;
}

/// Retrying, quota-aware fetcher over a [`Transport`].
#[derive(Clone)]
pub struct ResilientFetcher {
    transport: Arc<dyn Transport>,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
    markers: ProviderMarkers,
    quota: Arc<RequestQuota>,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancelToken,
}

impl fmt::Debug for ResilientFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientFetcher")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("retry", &self.retry)
            .field("markers", &self.markers)
            .field("quota", &self.quota)
            .finish()
    }
}

impl ResilientFetcher {
    pub fn new(transport: Arc<dyn Transport>, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            retry: RetryPolicy::default(),
            markers: ProviderMarkers::default(),
            quota: Arc::new(RequestQuota::unlimited()),
            sleeper: Arc::new(ThreadSleeper),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_markers(mut self, markers: ProviderMarkers) -> Self {
        self.markers = markers;
        self
    }

    pub fn with_quota(mut self, quota: Arc<RequestQuota>) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn quota(&self) -> &Arc<RequestQuota> {
        &self.quota
    }

    /// Handle that cancels this fetcher's retry loop.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Query parameters for one request, including the API key.
    fn request_params(&self, query: &Query) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("function", query.function.api_name().to_string()),
            ("symbol", query.symbol.clone()),
        ];
        if let Some(interval) = query.interval {
            params.push(("interval", interval.as_str().to_string()));
        }
        params.push(("outputsize", query.output_size.as_str().to_string()));
        params.push(("apikey", self.api_key.clone()));
        params
    }

    /// One request, classified.
    fn attempt(&self, query: &Query) -> Result<FetchedPayload, FetchError> {
        let today = Utc::now().date_naive();
        if !self.quota.try_acquire(today) {
            return Err(FetchError::RateLimited(
                "daily request quota exhausted".into(),
            ));
        }

        let params = self.request_params(query);
        let result = self.transport.get(&self.base_url, &params);
        let outcome = self.classify(query, result);

        if matches!(outcome, Err(FetchError::RateLimited(_))) {
            self.quota.exhaust(today);
        }
        outcome
    }

    /// Map a transport result onto the failure taxonomy.
    fn classify(
        &self,
        query: &Query,
        result: Result<HttpResponse, TransportError>,
    ) -> Result<FetchedPayload, FetchError> {
        let resp = match result {
            Ok(resp) => resp,
            Err(TransportError::Timeout(msg)) => return Err(FetchError::Timeout(msg)),
            Err(TransportError::Connect(msg) | TransportError::Other(msg)) => {
                return Err(FetchError::Network(msg))
            }
        };

        match resp.status {
            429 => {
                return Err(FetchError::RateLimited(format!(
                    "HTTP 429 for {}",
                    query.symbol
                )))
            }
            500..=599 => {
                return Err(FetchError::Network(format!(
                    "HTTP {} for {}",
                    resp.status, query.symbol
                )))
            }
            _ if !resp.is_success() => {
                return Err(FetchError::MalformedResponse(format!(
                    "unexpected HTTP {} for {}",
                    resp.status, query.symbol
                )))
            }
            _ => {}
        }

        let body: Value = serde_json::from_str(&resp.body)
            .map_err(|e| FetchError::MalformedResponse(format!("body is not JSON: {e}")))?;
        let Value::Object(body) = body else {
            return Err(FetchError::MalformedResponse(
                "body is not a JSON object".into(),
            ));
        };

        if let Some(message) = self.markers.invalid_symbol(&body) {
            return Err(FetchError::InvalidSymbol {
                symbol: query.symbol.clone(),
                message,
            });
        }
        if let Some(message) = self.markers.rate_limit(&body) {
            return Err(FetchError::RateLimited(message));
        }

        let rows = decode_object(&body, query)?;
        Ok(FetchedPayload {
            raw: resp.body,
            rows,
        })
    }
}

impl SeriesFetcher for ResilientFetcher {
    fn fetch(&self, query: &Query) -> Result<FetchedPayload, FetchError> {
        query.validate()?;

        let attempts = self.retry.attempts();
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                if self.cancel.is_cancelled() {
                    return Err(FetchError::Interrupted { attempt });
                }
                let delay = self.retry.delay_before(attempt);
                warn!(
                    query = %query,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after transient failure"
                );
                self.sleeper.sleep(delay);
            }
            if self.cancel.is_cancelled() {
                return Err(FetchError::Interrupted { attempt });
            }

            debug!(query = %query, attempt, max_attempts = attempts, "requesting series");
            match self.attempt(query) {
                Ok(payload) => {
                    info!(query = %query, rows = payload.rows.len(), attempt, "fetched series");
                    return Ok(payload);
                }
                Err(e) if e.is_retryable() => {
                    warn!(query = %query, attempt, error = %e, "transient fetch failure");
                    last_error = Some(e);
                }
                Err(e) => {
                    debug!(query = %query, attempt, error = %e, "terminal fetch failure");
                    return Err(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| FetchError::Network("no attempt was made".into())))
    }
}
