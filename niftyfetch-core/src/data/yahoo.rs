//! Yahoo Finance data provider.
//!
//! Fetches OHLCV candles from Yahoo's v8 chart API and converts epoch
//! timestamps to exchange-local wall-clock time using the `gmtoffset` the
//! response carries.
//!
//! Yahoo Finance has no official API and is subject to unannounced format changes.
//! Intraday history is limited: sub-hour bars reach back about 60 days and
//! hourly bars about two years.

use super::fivepaisa::retry_after;
use super::provider::{CandleProvider, FetchError, FetchRequest};
use crate::domain::{Candle, Granularity, Interval, Series};
use chrono::{DateTime, Duration, NaiveDateTime};
use serde::Deserialize;

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

pub const CHART_BASE_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";

/// Yahoo Finance data provider.
pub struct YahooProvider {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl YahooProvider {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_base_url(CHART_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(FetchError::from_reqwest)?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn interval_code(interval: Interval) -> Result<&'static str, FetchError> {
        match interval {
            Interval::Minute10 => Err(FetchError::InvalidRange(
                "Yahoo Finance has no 10m bars".into(),
            )),
            other => Ok(other.as_code()),
        }
    }

    /// Build the chart API URL for an identifier and window.
    fn chart_url(&self, request: &FetchRequest<'_>) -> Result<String, FetchError> {
        let window = request.window;
        let interval = Self::interval_code(window.interval())?;
        // Window bounds are exchange-local and Yahoo wants epoch seconds, so
        // ask from a day early and let the caller clip to the window.
        let start_ts = (window.start() - Duration::days(1)).and_utc().timestamp();
        let end_ts = window.end().and_utc().timestamp();
        Ok(format!(
            "{}/{}?period1={start_ts}&period2={end_ts}&interval={interval}&includePrePost=false",
            self.base_url, request.provider_id
        ))
    }

    /// Parse the chart API response into a series.
    fn parse_response(
        symbol: &str,
        granularity: Granularity,
        resp: ChartResponse,
    ) -> Result<Series, FetchError> {
        let result = resp.chart.result.ok_or_else(|| {
            if let Some(err) = resp.chart.error {
                if err.code == "Not Found" {
                    FetchError::Provider {
                        message: format!("symbol not found: {symbol}"),
                    }
                } else {
                    FetchError::ResponseFormat(format!("{}: {}", err.code, err.description))
                }
            } else {
                FetchError::ResponseFormat("empty result with no error".into())
            }
        })?;

        let data = result
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::ResponseFormat("result array is empty".into()))?;

        // A window with no trading sessions comes back without timestamps.
        let timestamps = match data.timestamp {
            Some(ts) => ts,
            None => return Ok(Series::empty(granularity)),
        };

        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::ResponseFormat("no quote data".into()))?;

        let offset = data.meta.gmtoffset;
        let mut candles = Vec::with_capacity(timestamps.len());

        for (i, &ts) in timestamps.iter().enumerate() {
            let timestamp = local_timestamp(ts, offset, granularity).ok_or_else(|| {
                FetchError::ResponseFormat(format!("invalid timestamp: {ts}"))
            })?;

            let open = quote.open.get(i).copied().flatten();
            let high = quote.high.get(i).copied().flatten();
            let low = quote.low.get(i).copied().flatten();
            let close = quote.close.get(i).copied().flatten();
            let volume = quote.volume.get(i).copied().flatten();

            // Skip rows where all OHLCV are None (holidays/halted sessions)
            if open.is_none()
                && high.is_none()
                && low.is_none()
                && close.is_none()
                && volume.is_none()
            {
                continue;
            }

            candles.push(Candle {
                timestamp,
                open: open.unwrap_or(f64::NAN),
                high: high.unwrap_or(f64::NAN),
                low: low.unwrap_or(f64::NAN),
                close: close.unwrap_or(f64::NAN),
                volume: volume.unwrap_or(0.0),
            });
        }

        Ok(Series::new(granularity, candles))
    }
}

/// Epoch seconds to exchange-local time; daily bars collapse to midnight.
fn local_timestamp(ts: i64, gmtoffset: i64, granularity: Granularity) -> Option<NaiveDateTime> {
    let local = DateTime::from_timestamp(ts.checked_add(gmtoffset)?, 0)?.naive_utc();
    Some(match granularity {
        Granularity::Daily => local.date().and_time(Default::default()),
        Granularity::Intraday => local,
    })
}

impl CandleProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch_candles(&self, request: &FetchRequest<'_>) -> Result<Series, FetchError> {
        let url = self.chart_url(request)?;
        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(FetchError::from_reqwest)?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited {
                retry_after_secs: retry_after(&resp).unwrap_or(60),
            });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(FetchError::SessionExpired);
        }
        // 404 still carries a chart error body worth decoding
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::Http {
                status: status.as_u16(),
                body: resp.text().unwrap_or_default(),
            });
        }

        let chart: ChartResponse = resp.json().map_err(|e| {
            FetchError::ResponseFormat(format!(
                "failed to parse response for {}: {e}",
                request.provider_id
            ))
        })?;

        Self::parse_response(
            request.provider_id,
            request.window.interval().granularity(),
            chart,
        )
    }

    fn max_window(&self, interval: Interval) -> Option<Duration> {
        match interval {
            Interval::Day1 => None,
            Interval::Hour1 => Some(Duration::days(730)),
            _ => Some(Duration::days(60)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::Exchange;
    use crate::domain::FetchWindow;
    use chrono::NaiveDate;

    const SAMPLE: &str = r#"{
        "chart": {
            "result": [{
                "meta": {"gmtoffset": 19800, "symbol": "RELIANCE.NS"},
                "timestamp": [1672631100, 1672717500, 1672803900],
                "indicators": {"quote": [{
                    "open":   [2550.0, null, 2560.0],
                    "high":   [2565.5, null, 2570.0],
                    "low":    [2541.1, null, 2555.0],
                    "close":  [2560.0, null, 2566.0],
                    "volume": [4500000, null, 3900000]
                }]}
            }],
            "error": null
        }
    }"#;

    #[test]
    fn parses_daily_bars_to_local_midnight() {
        let resp: ChartResponse = serde_json::from_str(SAMPLE).unwrap();
        let series = YahooProvider::parse_response("RELIANCE.NS", Granularity::Daily, resp).unwrap();

        // middle row is all-null and skipped
        assert_eq!(series.len(), 2);
        assert_eq!(
            series.first_timestamp(),
            Some(NaiveDate::from_ymd_opt(2023, 1, 2).unwrap().and_hms_opt(0, 0, 0).unwrap())
        );
        assert_eq!(series.candles()[1].close, 2566.0);
    }

    #[test]
    fn intraday_bars_keep_local_wall_clock() {
        // 1672631100 = 2023-01-02 03:45 UTC = 09:15 IST
        let ts = local_timestamp(1672631100, 19800, Granularity::Intraday).unwrap();
        assert_eq!(
            ts,
            NaiveDate::from_ymd_opt(2023, 1, 2).unwrap().and_hms_opt(9, 15, 0).unwrap()
        );
    }

    #[test]
    fn not_found_maps_to_provider_error() {
        let raw = r#"{"chart": {"result": null, "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}}"#;
        let resp: ChartResponse = serde_json::from_str(raw).unwrap();
        let err = YahooProvider::parse_response("NOPE.NS", Granularity::Daily, resp).unwrap_err();
        assert!(matches!(err, FetchError::Provider { .. }));
    }

    #[test]
    fn missing_timestamps_is_empty_series() {
        let raw = r#"{"chart": {"result": [{"meta": {"gmtoffset": 19800}, "indicators": {"quote": [{}]}}], "error": null}}"#;
        let resp: ChartResponse = serde_json::from_str(raw).unwrap();
        let series = YahooProvider::parse_response("TCS.NS", Granularity::Daily, resp).unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn chart_url_encodes_window() {
        let p = YahooProvider::with_base_url("http://localhost/chart").unwrap();
        let window = FetchWindow::from_dates(
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 1, 10).unwrap(),
            Interval::Day1,
        )
        .unwrap();
        let req = FetchRequest {
            provider_id: "TCS.NS",
            exchange: Exchange::default(),
            window,
        };
        assert_eq!(
            p.chart_url(&req).unwrap(),
            "http://localhost/chart/TCS.NS?period1=1672444800&period2=1673308800&interval=1d&includePrePost=false"
        );
    }

    #[test]
    fn ten_minute_bars_unsupported() {
        assert!(YahooProvider::interval_code(Interval::Minute10).is_err());
    }

    #[test]
    fn intraday_windows_are_capped() {
        let p = YahooProvider::with_base_url("http://localhost").unwrap();
        assert_eq!(p.max_window(Interval::Day1), None);
        assert_eq!(p.max_window(Interval::Minute15), Some(Duration::days(60)));
    }
}
