//! Series query model.
//!
//! A [`Query`] names one provider time series: symbol, series function and,
//! for intraday series only, the bar interval. The interval's presence is
//! fully determined by the series function; [`Query::validate`] enforces it.

use crate::error::FetchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Aggregation granularity requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeriesFunction {
    Daily,
    DailyAdjusted,
    Weekly,
    WeeklyAdjusted,
    Monthly,
    MonthlyAdjusted,
    Intraday,
}

impl SeriesFunction {
    pub const ALL: [SeriesFunction; 7] = [
        Self::Daily,
        Self::DailyAdjusted,
        Self::Weekly,
        Self::WeeklyAdjusted,
        Self::Monthly,
        Self::MonthlyAdjusted,
        Self::Intraday,
    ];

    /// Value of the provider's `function` request parameter.
    pub const fn api_name(self) -> &'static str {
        match self {
            Self::Daily => "TIME_SERIES_DAILY",
            Self::DailyAdjusted => "TIME_SERIES_DAILY_ADJUSTED",
            Self::Weekly => "TIME_SERIES_WEEKLY",
            Self::WeeklyAdjusted => "TIME_SERIES_WEEKLY_ADJUSTED",
            Self::Monthly => "TIME_SERIES_MONTHLY",
            Self::MonthlyAdjusted => "TIME_SERIES_MONTHLY_ADJUSTED",
            Self::Intraday => "TIME_SERIES_INTRADAY",
        }
    }

    /// Short kebab-case name used on the command line.
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::DailyAdjusted => "daily-adjusted",
            Self::Weekly => "weekly",
            Self::WeeklyAdjusted => "weekly-adjusted",
            Self::Monthly => "monthly",
            Self::MonthlyAdjusted => "monthly-adjusted",
            Self::Intraday => "intraday",
        }
    }

    pub const fn requires_interval(self) -> bool {
        matches!(self, Self::Intraday)
    }

    /// Adjusted series carry adjusted close, dividend and (daily only) split data.
    pub const fn is_adjusted(self) -> bool {
        matches!(
            self,
            Self::DailyAdjusted | Self::WeeklyAdjusted | Self::MonthlyAdjusted
        )
    }
}

impl fmt::Display for SeriesFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

impl FromStr for SeriesFunction {
    type Err = FetchError;

    /// Accepts the provider name (`TIME_SERIES_DAILY`) or the short name
    /// (`daily`, `daily-adjusted`, `daily_adjusted`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        let normalized = normalized
            .strip_prefix("time-series-")
            .unwrap_or(&normalized);
        Self::ALL
            .into_iter()
            .find(|f| f.short_name() == normalized)
            .ok_or_else(|| FetchError::InvalidQuery(format!("unknown series function '{s}'")))
    }
}

/// Intraday bar interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1min")]
    OneMinute,
    #[serde(rename = "5min")]
    FiveMinutes,
    #[serde(rename = "15min")]
    FifteenMinutes,
    #[serde(rename = "30min")]
    ThirtyMinutes,
    #[serde(rename = "60min")]
    SixtyMinutes,
}

impl Interval {
    pub const ALL: [Interval; 5] = [
        Self::OneMinute,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::ThirtyMinutes,
        Self::SixtyMinutes,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1min",
            Self::FiveMinutes => "5min",
            Self::FifteenMinutes => "15min",
            Self::ThirtyMinutes => "30min",
            Self::SixtyMinutes => "60min",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| {
                FetchError::InvalidQuery(format!(
                    "unknown interval '{s}' (expected 1min, 5min, 15min, 30min or 60min)"
                ))
            })
    }
}

/// Provider `outputsize` parameter: latest 100 points or the full history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputSize {
    Compact,
    #[default]
    Full,
}

impl OutputSize {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Full => "full",
        }
    }
}

/// One time-series request.
///
/// The symbol is trimmed and uppercased on construction; its character rules
/// are the caller's responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    pub symbol: String,
    pub function: SeriesFunction,
    pub interval: Option<Interval>,
    pub output_size: OutputSize,
}

impl Query {
    pub fn new(symbol: impl Into<String>, function: SeriesFunction) -> Self {
        Self {
            symbol: symbol.into().trim().to_uppercase(),
            function,
            interval: None,
            output_size: OutputSize::default(),
        }
    }

    /// Intraday query for the given interval.
    pub fn intraday(symbol: impl Into<String>, interval: Interval) -> Self {
        Self::new(symbol, SeriesFunction::Intraday).with_interval(interval)
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_output_size(mut self, output_size: OutputSize) -> Self {
        self.output_size = output_size;
        self
    }

    /// Check the shape invariant: an interval is present iff the series is intraday.
    pub fn validate(&self) -> Result<(), FetchError> {
        match (self.function.requires_interval(), self.interval) {
            (true, None) => Err(FetchError::InvalidQuery(format!(
                "{} requires an interval",
                self.function
            ))),
            (false, Some(interval)) => Err(FetchError::InvalidQuery(format!(
                "{} does not accept an interval (got {interval})",
                self.function
            ))),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.symbol, self.function)?;
        if let Some(interval) = self.interval {
            write!(f, " ({interval})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_is_normalized() {
        let q = Query::new("  aapl ", SeriesFunction::Daily);
        assert_eq!(q.symbol, "AAPL");
        assert_eq!(q.output_size, OutputSize::Full);
    }

    #[test]
    fn intraday_requires_interval() {
        let q = Query::new("MSFT", SeriesFunction::Intraday);
        assert!(matches!(q.validate(), Err(FetchError::InvalidQuery(_))));

        let q = Query::intraday("MSFT", Interval::FiveMinutes);
        assert!(q.validate().is_ok());
    }

    #[test]
    fn non_intraday_rejects_interval() {
        for function in SeriesFunction::ALL {
            if function.requires_interval() {
                continue;
            }
            assert!(Query::new("IBM", function).validate().is_ok());
            let q = Query::new("IBM", function).with_interval(Interval::OneMinute);
            assert!(q.validate().is_err(), "{function} accepted an interval");
        }
    }

    #[test]
    fn function_parses_short_and_api_names() {
        assert_eq!(
            "daily-adjusted".parse::<SeriesFunction>().unwrap(),
            SeriesFunction::DailyAdjusted
        );
        assert_eq!(
            "TIME_SERIES_MONTHLY_ADJUSTED".parse::<SeriesFunction>().unwrap(),
            SeriesFunction::MonthlyAdjusted
        );
        assert_eq!(
            "weekly_adjusted".parse::<SeriesFunction>().unwrap(),
            SeriesFunction::WeeklyAdjusted
        );
        assert!("hourly".parse::<SeriesFunction>().is_err());
    }

    #[test]
    fn interval_parses() {
        assert_eq!("15min".parse::<Interval>().unwrap(), Interval::FifteenMinutes);
        assert!("2min".parse::<Interval>().is_err());
    }

    #[test]
    fn display_includes_interval() {
        let q = Query::intraday("TSLA", Interval::SixtyMinutes);
        assert_eq!(q.to_string(), "TSLA TIME_SERIES_INTRADAY (60min)");
    }
}
