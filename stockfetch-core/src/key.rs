//! Cache key derivation.
//!
//! A key is the BLAKE3 digest of a canonical JSON rendering of the query's
//! identity. It depends only on the query fields, so the same query maps to
//! the same cache file across runs, builds and platforms.

use crate::error::FetchError;
use crate::query::Query;
use serde_json::json;
use std::fmt;

/// Deterministic fingerprint of a [`Query`], used as the cache file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the cache key for `query`.
///
/// Fails with [`FetchError::InvalidQuery`] when the interval does not match
/// the series function.
pub fn derive(query: &Query) -> Result<CacheKey, FetchError> {
    query.validate()?;

    // json! with fixed field names renders keys in sorted order
    let canonical = json!({
        "symbol": query.symbol,
        "function": query.function.api_name(),
        "interval": query.interval.map(|i| i.as_str()),
        "outputsize": query.output_size.as_str(),
    });

    let hash = blake3::hash(canonical.to_string().as_bytes());
    Ok(CacheKey(hash.to_hex().to_string()))
}
