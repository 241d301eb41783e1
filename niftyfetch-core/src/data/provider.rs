//! Candle provider trait and structured fetch errors.
//!
//! The CandleProvider trait abstracts over data sources (Yahoo Finance chart
//! API, 5paisa historical API) so the batch fetcher can drive any of them and
//! tests can substitute a scripted provider.

use crate::domain::{FetchWindow, Interval, Series};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Structured error types for a single provider call.
///
/// These are designed to be displayable in CLI logs.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("response format changed: {0}")]
    ResponseFormat(String),

    #[error("provider rejected request: {message}")]
    Provider { message: String },

    #[error("session expired or not logged in")]
    SessionExpired,

    #[error("invalid range: {0}")]
    InvalidRange(String),
}

impl FetchError {
    /// Faults worth retrying after a backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout(_) | FetchError::RateLimited { .. } => true,
            FetchError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// Exchange and segment codes, NSE cash by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub code: char,
    pub segment: char,
}

impl Default for Exchange {
    fn default() -> Self {
        Self {
            code: 'N',
            segment: 'C',
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.code, self.segment)
    }
}

/// One provider call: a resolved identifier and a window it can serve whole.
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub provider_id: &'a str,
    pub exchange: Exchange,
    pub window: FetchWindow,
}

/// Trait for candle providers.
///
/// Each call to `fetch_candles` consumes one unit of the provider's rate
/// budget. Providers do not throttle themselves; the batch fetcher does.
pub trait CandleProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch candles for one identifier over one window.
    fn fetch_candles(&self, request: &FetchRequest<'_>) -> Result<Series, FetchError>;

    /// Largest window one request may cover for `interval`, if limited.
    fn max_window(&self, interval: Interval) -> Option<Duration>;
}

impl<P: CandleProvider + ?Sized> CandleProvider for &P {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch_candles(&self, request: &FetchRequest<'_>) -> Result<Series, FetchError> {
        (**self).fetch_candles(request)
    }

    fn max_window(&self, interval: Interval) -> Option<Duration> {
        (**self).max_window(interval)
    }
}
