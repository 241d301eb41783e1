//! Shared fixtures for runner integration tests.

#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
use niftyfetch_core::data::{
    CandleProvider, FetchError, FetchRequest, RecordingSleeper, SymbolDirectory,
};
use niftyfetch_core::domain::{Candle, Interval, Series};
use niftyfetch_runner::{BatchFetcher, BatchOptions};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub provider_id: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Deterministic provider: one bar per interval bucket inside the window.
///
/// Close prices depend only on the timestamp plus `price_offset`, so a
/// refetched row can be told apart from a persisted one by changing the
/// offset between runs.
#[derive(Default)]
pub struct ScriptedProvider {
    pub calls: Mutex<Vec<Call>>,
    pub max_window: Option<Duration>,
    pub failing_ids: HashSet<String>,
    /// Also return the row at `window.end`, like APIs with inclusive end dates.
    pub inclusive_end: bool,
    pub price_offset: f64,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_window(mut self, span: Duration) -> Self {
        self.max_window = Some(span);
        self
    }

    pub fn failing(mut self, provider_id: &str) -> Self {
        self.failing_ids.insert(provider_id.to_string());
        self
    }

    pub fn inclusive(mut self) -> Self {
        self.inclusive_end = true;
        self
    }

    pub fn with_price_offset(mut self, offset: f64) -> Self {
        self.price_offset = offset;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, provider_id: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.provider_id == provider_id)
            .collect()
    }
}

impl CandleProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch_candles(&self, request: &FetchRequest<'_>) -> Result<Series, FetchError> {
        let window = request.window;
        self.calls.lock().unwrap().push(Call {
            provider_id: request.provider_id.to_string(),
            start: window.start(),
            end: window.end(),
        });

        if self.failing_ids.contains(request.provider_id) {
            return Err(FetchError::Provider {
                message: format!("no data for {}", request.provider_id),
            });
        }

        let step = window.interval().bucket();
        let mut t = window.start().date().and_time(Default::default());
        while t < window.start() {
            t += step;
        }

        let mut candles = Vec::new();
        while t < window.end() || (self.inclusive_end && t == window.end()) {
            let close = 100.0 + (t.and_utc().timestamp() / 60 % 97) as f64 + self.price_offset;
            candles.push(Candle {
                timestamp: t,
                open: close - 0.5,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000.0,
            });
            t += step;
        }
        Ok(Series::new(window.interval().granularity(), candles))
    }

    fn max_window(&self, _interval: Interval) -> Option<Duration> {
        self.max_window
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    date(y, m, d).and_hms_opt(h, min, 0).unwrap()
}

/// Fetcher over `provider` whose pauses are recorded instead of slept.
pub fn fetcher(
    provider: Arc<ScriptedProvider>,
    symbols: &[&str],
    options: BatchOptions,
) -> (BatchFetcher, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::new());
    let fetcher = BatchFetcher::with_sleeper(
        provider,
        Arc::new(SymbolDirectory::identity(symbols)),
        options,
        sleeper.clone(),
    );
    (fetcher, sleeper)
}
