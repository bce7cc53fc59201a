//! Failure taxonomy for series fetches.
//!
//! Every failure a caller can observe is a [`FetchError`]. Its [`FailureKind`]
//! decides whether the fetcher retries it and which message a front end shows.
//! Cache I/O problems never appear here; they are absorbed by the client.

use crate::series::Series;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result of one `get_series` call. There is no partial success.
pub type FetchOutcome = Result<Series, FetchError>;

/// Coarse classification of a [`FetchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    InvalidQuery,
    RateLimited,
    InvalidSymbol,
    Timeout,
    NetworkError,
    MalformedResponse,
    Interrupted,
}

impl FailureKind {
    /// Only transient transport failures are worth another attempt.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::NetworkError)
    }

    /// Message suitable for showing to an end user.
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::InvalidQuery => "The request was malformed; check the series and interval options.",
            Self::RateLimited => {
                "API rate limit reached. Try again later or rely on cached data."
            }
            Self::InvalidSymbol => "The provider does not recognize this symbol.",
            Self::Timeout => "The provider did not respond in time. Check your connection and retry.",
            Self::NetworkError => "Could not reach the data provider. Check your connection and retry.",
            Self::MalformedResponse => "The provider returned data in an unexpected format.",
            Self::Interrupted => "The request was cancelled.",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidQuery => "invalid query",
            Self::RateLimited => "rate limited",
            Self::InvalidSymbol => "invalid symbol",
            Self::Timeout => "timeout",
            Self::NetworkError => "network error",
            Self::MalformedResponse => "malformed response",
            Self::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

/// A terminal fetch failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    #[error("invalid symbol '{symbol}': {message}")]
    InvalidSymbol { symbol: String, message: String },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("interrupted before attempt {attempt}")]
    Interrupted { attempt: u32 },
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidQuery(_) => FailureKind::InvalidQuery,
            Self::RateLimited(_) => FailureKind::RateLimited,
            Self::InvalidSymbol { .. } => FailureKind::InvalidSymbol,
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Network(_) => FailureKind::NetworkError,
            Self::MalformedResponse(_) => FailureKind::MalformedResponse,
            Self::Interrupted { .. } => FailureKind::Interrupted,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}
