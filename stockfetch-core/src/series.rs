//! OHLCV records and provider payload decoding.
//!
//! The provider returns each series as a JSON object keyed by timestamp
//! string, with numeric values encoded as strings under numbered field names
//! (`"1. open"`, `"5. adjusted close"`, ...). Object order is not meaningful,
//! so decoded rows are always sorted by timestamp ascending.

use crate::error::FetchError;
use crate::query::{Query, SeriesFunction};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

/// One bar of a time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvRecord {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    /// Adjusted series only.
    pub adjusted_close: Option<f64>,
    /// Adjusted series only.
    pub dividend: Option<f64>,
    /// Daily adjusted series only.
    pub split_coefficient: Option<f64>,
}

impl OhlcvRecord {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

/// Rejected date filter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("end date {end} is before start date {start}")]
pub struct InvalidDateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// A successfully fetched series, ascending by timestamp.
///
/// Rows are read-only once handed out; callers get slices.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    rows: Vec<OhlcvRecord>,
    served_from_cache: bool,
}

impl Series {
    pub(crate) fn new(mut rows: Vec<OhlcvRecord>, served_from_cache: bool) -> Self {
        sort_ascending(&mut rows);
        Self {
            rows,
            served_from_cache,
        }
    }

    pub fn rows(&self) -> &[OhlcvRecord] {
        &self.rows
    }

    /// True when the rows came from a fresh cache entry rather than the network.
    pub fn served_from_cache(&self) -> bool {
        self.served_from_cache
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&OhlcvRecord> {
        self.rows.first()
    }

    pub fn last(&self) -> Option<&OhlcvRecord> {
        self.rows.last()
    }

    pub fn is_adjusted(&self) -> bool {
        self.rows.iter().any(|r| r.adjusted_close.is_some())
    }

    /// Rows whose date falls in `[start, end]`.
    pub fn between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<&[OhlcvRecord], InvalidDateRange> {
        if end < start {
            return Err(InvalidDateRange { start, end });
        }
        let lo = self.rows.partition_point(|r| r.date() < start);
        let hi = self.rows.partition_point(|r| r.date() <= end);
        Ok(&self.rows[lo..hi])
    }
}

fn sort_ascending(rows: &mut [OhlcvRecord]) {
    rows.sort_by_key(|r| r.timestamp);
}

// ── Payload decoding ────────────────────────────────────────────────

/// Name of the top-level object holding the series for a query.
///
/// Intraday payloads name the object after the interval, e.g. `Time Series (5min)`.
pub fn series_object_name(query: &Query) -> Option<String> {
    let name = match query.function {
        SeriesFunction::Daily | SeriesFunction::DailyAdjusted => "Time Series (Daily)",
        SeriesFunction::Weekly => "Weekly Time Series",
        SeriesFunction::WeeklyAdjusted => "Weekly Adjusted Time Series",
        SeriesFunction::Monthly => "Monthly Time Series",
        SeriesFunction::MonthlyAdjusted => "Monthly Adjusted Time Series",
        SeriesFunction::Intraday => {
            return query.interval.map(|i| format!("Time Series ({i})"));
        }
    };
    Some(name.to_string())
}

/// Decode a raw provider body into rows sorted ascending by timestamp.
pub fn decode_payload(payload: &str, query: &Query) -> Result<Vec<OhlcvRecord>, FetchError> {
    let root: Value = serde_json::from_str(payload)
        .map_err(|e| FetchError::MalformedResponse(format!("body is not JSON: {e}")))?;
    let root = root
        .as_object()
        .ok_or_else(|| FetchError::MalformedResponse("body is not a JSON object".into()))?;
    decode_object(root, query)
}

/// Decode an already-parsed top-level object.
pub(crate) fn decode_object(
    root: &Map<String, Value>,
    query: &Query,
) -> Result<Vec<OhlcvRecord>, FetchError> {
    let series = locate_series(root, query)?;
    if series.is_empty() {
        return Err(FetchError::MalformedResponse(
            "time series object is empty".into(),
        ));
    }

    let mut rows = series
        .iter()
        .map(|(stamp, fields)| decode_row(stamp, fields))
        .collect::<Result<Vec<_>, _>>()?;
    sort_ascending(&mut rows);
    Ok(rows)
}

fn locate_series<'a>(
    root: &'a Map<String, Value>,
    query: &Query,
) -> Result<&'a Map<String, Value>, FetchError> {
    let expected = series_object_name(query);
    let found = expected
        .as_deref()
        .and_then(|name| root.get(name))
        .or_else(|| {
            // Intraday naming has varied; accept any "Time Series ..." object.
            if query.function == SeriesFunction::Intraday {
                root.iter()
                    .find(|(k, _)| k.starts_with("Time Series"))
                    .map(|(_, v)| v)
            } else {
                None
            }
        });

    match found {
        Some(Value::Object(series)) => Ok(series),
        Some(_) => Err(FetchError::MalformedResponse(
            "time series entry is not an object".into(),
        )),
        None => Err(FetchError::MalformedResponse(format!(
            "missing time series object {:?}",
            expected.unwrap_or_default()
        ))),
    }
}

fn decode_row(stamp: &str, fields: &Value) -> Result<OhlcvRecord, FetchError> {
    let timestamp = parse_timestamp(stamp)?;
    let fields = fields.as_object().ok_or_else(|| {
        FetchError::MalformedResponse(format!("bar {stamp} is not an object"))
    })?;

    // "1. open" -> "open", "5. adjusted close" -> "adjusted close"
    let named: HashMap<&str, &Value> = fields
        .iter()
        .map(|(k, v)| (k.split_once(". ").map_or(k.as_str(), |(_, n)| n), v))
        .collect();

    let required = |name: &str| -> Result<f64, FetchError> {
        named
            .get(name)
            .and_then(|v| number(v))
            .ok_or_else(|| {
                FetchError::MalformedResponse(format!("bar {stamp}: bad or missing {name}"))
            })
    };
    let optional = |name: &str| named.get(name).and_then(|v| number(v));

    let volume = required("volume")?;
    if volume < 0.0 {
        return Err(FetchError::MalformedResponse(format!(
            "bar {stamp}: negative volume"
        )));
    }

    Ok(OhlcvRecord {
        timestamp,
        open: required("open")?,
        high: required("high")?,
        low: required("low")?,
        close: required("close")?,
        volume: volume.round() as u64,
        adjusted_close: optional("adjusted close"),
        dividend: optional("dividend amount"),
        split_coefficient: optional("split coefficient"),
    })
}

/// Provider numbers arrive as strings; accept bare JSON numbers too.
fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn parse_timestamp(stamp: &str) -> Result<NaiveDateTime, FetchError> {
    let stamp = stamp.trim();
    NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M"))
        .or_else(|_| {
            NaiveDate::parse_from_str(stamp, "%Y-%m-%d").map(|d| d.and_time(NaiveTime::default()))
        })
        .map_err(|_| FetchError::MalformedResponse(format!("unparsable timestamp '{stamp}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Interval;

    const DAILY: &str = r#"{
        "Meta Data": {"2. Symbol": "IBM"},
        "Time Series (Daily)": {
            "2024-01-03": {"1. open": "100.0", "2. high": "105.0", "3. low": "99.0", "4. close": "103.0", "5. volume": "1000000"},
            "2024-01-02": {"1. open": "98.0", "2. high": "101.0", "3. low": "97.0", "4. close": "100.0", "5. volume": "950000"}
        }
    }"#;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn decodes_and_sorts_daily() {
        let rows = decode_payload(DAILY, &Query::new("IBM", SeriesFunction::Daily)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date(), date(2024, 1, 2));
        assert_eq!(rows[0].open, 98.0);
        assert_eq!(rows[1].close, 103.0);
        assert_eq!(rows[1].volume, 1_000_000);
        assert!(rows[0].adjusted_close.is_none());
    }

    #[test]
    fn decodes_daily_adjusted_fields() {
        let body = r#"{"Time Series (Daily)": {
            "2024-03-01": {"1. open": "10", "2. high": "11", "3. low": "9", "4. close": "10.5",
                           "5. adjusted close": "10.4", "6. volume": "500",
                           "7. dividend amount": "0.0000", "8. split coefficient": "1.0"}
        }}"#;
        let rows = decode_payload(body, &Query::new("X", SeriesFunction::DailyAdjusted)).unwrap();
        assert_eq!(rows[0].adjusted_close, Some(10.4));
        assert_eq!(rows[0].volume, 500);
        assert_eq!(rows[0].dividend, Some(0.0));
        assert_eq!(rows[0].split_coefficient, Some(1.0));
    }

    #[test]
    fn decodes_intraday_timestamps() {
        let body = r#"{"Time Series (5min)": {
            "2024-01-02 16:00:00": {"1. open": "1", "2. high": "2", "3. low": "1", "4. close": "2", "5. volume": "10"},
            "2024-01-02 15:55:00": {"1. open": "1", "2. high": "2", "3. low": "1", "4. close": "1", "5. volume": "12"}
        }}"#;
        let rows = decode_payload(body, &Query::intraday("X", Interval::FiveMinutes)).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].timestamp < rows[1].timestamp);
        assert_eq!(rows[0].volume, 12);
    }

    #[test]
    fn missing_series_is_malformed() {
        let body = r#"{"Meta Data": {}}"#;
        let err = decode_payload(body, &Query::new("X", SeriesFunction::Weekly)).unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse(_)));
    }

    #[test]
    fn empty_series_is_malformed() {
        let body = r#"{"Monthly Time Series": {}}"#;
        let err = decode_payload(body, &Query::new("X", SeriesFunction::Monthly)).unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse(_)));
    }

    #[test]
    fn bad_number_is_malformed() {
        let body = r#"{"Weekly Time Series": {
            "2024-01-05": {"1. open": "abc", "2. high": "2", "3. low": "1", "4. close": "2", "5. volume": "10"}
        }}"#;
        assert!(decode_payload(body, &Query::new("X", SeriesFunction::Weekly)).is_err());
    }

    #[test]
    fn non_json_is_malformed() {
        let err = decode_payload("<html>", &Query::new("X", SeriesFunction::Daily)).unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse(_)));
    }

    #[test]
    fn between_filters_inclusive_range() {
        let rows = decode_payload(DAILY, &Query::new("IBM", SeriesFunction::Daily)).unwrap();
        let series = Series::new(rows, false);

        let all = series.between(date(2024, 1, 1), date(2024, 1, 31)).unwrap();
        assert_eq!(all.len(), 2);

        let one = series.between(date(2024, 1, 3), date(2024, 1, 3)).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].date(), date(2024, 1, 3));

        let none = series.between(date(2023, 1, 1), date(2023, 12, 31)).unwrap();
        assert!(none.is_empty());

        assert!(series.between(date(2024, 2, 1), date(2024, 1, 1)).is_err());
    }
}
