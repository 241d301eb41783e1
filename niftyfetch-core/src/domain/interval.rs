//! Candle intervals and the timestamp granularity they imply.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bar size requested from a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "5m")]
    Minute5,
    #[serde(rename = "10m")]
    Minute10,
    #[serde(rename = "15m")]
    Minute15,
    #[serde(rename = "30m")]
    Minute30,
    #[serde(rename = "60m")]
    Hour1,
    #[serde(rename = "1d")]
    Day1,
}

impl Interval {
    pub const ALL: [Interval; 7] = [
        Interval::Minute1,
        Interval::Minute5,
        Interval::Minute10,
        Interval::Minute15,
        Interval::Minute30,
        Interval::Hour1,
        Interval::Day1,
    ];

    /// Code used on the wire by both providers (`15m`, `1d`, ...).
    pub fn as_code(&self) -> &'static str {
        match self {
            Interval::Minute1 => "1m",
            Interval::Minute5 => "5m",
            Interval::Minute10 => "10m",
            Interval::Minute15 => "15m",
            Interval::Minute30 => "30m",
            Interval::Hour1 => "60m",
            Interval::Day1 => "1d",
        }
    }

    /// Length of one bar.
    pub fn bucket(&self) -> Duration {
        match self {
            Interval::Minute1 => Duration::minutes(1),
            Interval::Minute5 => Duration::minutes(5),
            Interval::Minute10 => Duration::minutes(10),
            Interval::Minute15 => Duration::minutes(15),
            Interval::Minute30 => Duration::minutes(30),
            Interval::Hour1 => Duration::hours(1),
            Interval::Day1 => Duration::days(1),
        }
    }

    pub fn granularity(&self) -> Granularity {
        match self {
            Interval::Day1 => Granularity::Daily,
            _ => Granularity::Intraday,
        }
    }

    pub fn is_intraday(&self) -> bool {
        self.granularity() == Granularity::Intraday
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" => Ok(Interval::Minute1),
            "5m" => Ok(Interval::Minute5),
            "10m" => Ok(Interval::Minute10),
            "15m" => Ok(Interval::Minute15),
            "30m" => Ok(Interval::Minute30),
            "60m" | "1h" => Ok(Interval::Hour1),
            "1d" | "day" | "daily" => Ok(Interval::Day1),
            other => Err(format!(
                "unknown interval '{other}' (expected one of 1m, 5m, 10m, 15m, 30m, 60m, 1d)"
            )),
        }
    }
}

/// Whether timestamps carry a time-of-day.
///
/// Decides the persisted timestamp column: `Date` for daily series,
/// `Datetime` for intraday series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    Daily,
    Intraday,
}

impl Granularity {
    pub fn timestamp_column(&self) -> &'static str {
        match self {
            Granularity::Daily => "Date",
            Granularity::Intraday => "Datetime",
        }
    }

    pub fn timestamp_format(&self) -> &'static str {
        match self {
            Granularity::Daily => "%Y-%m-%d",
            Granularity::Intraday => "%Y-%m-%d %H:%M:%S",
        }
    }

    /// Inverse of [`Granularity::timestamp_column`].
    pub fn from_column(name: &str) -> Option<Self> {
        match name.trim() {
            "Date" => Some(Granularity::Daily),
            "Datetime" => Some(Granularity::Intraday),
            _ => None,
        }
    }
}
