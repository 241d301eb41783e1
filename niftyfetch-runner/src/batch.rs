//! Rate-limited batch fetcher.
//!
//! Issues one provider call per (symbol, chunk), every call gated by the
//! shared [`RateLimiter`]. A symbol's chunks run one after another on the
//! same worker; different symbols run sequentially or on a private rayon
//! pool. Results come back over a channel and are joined before returning.

use crate::progress::FetchProgress;
use chrono::{Duration, NaiveDateTime};
use niftyfetch_core::data::{
    CandleProvider, Exchange, FetchError, FetchRequest, RateLimiter, RetryPolicy, Sleeper,
    SymbolDirectory, ThreadSleeper, CONCURRENT_RATE_CEILING, DEFAULT_RATE_WINDOW,
    SEQUENTIAL_RATE_CEILING,
};
use niftyfetch_core::domain::{FetchWindow, Interval, Series, WindowError};
use niftyfetch_core::store::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::{mpsc, Arc};
use thiserror::Error;

/// Why one symbol produced no series. Never aborts the rest of a batch.
#[derive(Debug, Error)]
pub enum SymbolError {
    #[error("symbol '{0}' is not in the symbol directory")]
    UnknownSymbol(String),

    #[error("fetch of [{start}, {end}) failed: {source}")]
    Fetch {
        start: NaiveDateTime,
        end: NaiveDateTime,
        #[source]
        source: FetchError,
    },

    #[error("stored series uses '{stored}' timestamps but '{requested}' were requested")]
    GranularityMismatch { stored: String, requested: String },

    #[error(transparent)]
    Window(#[from] WindowError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Batch-level failure; per-symbol problems are reported in [`BatchOutcome`].
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchMode {
    /// One symbol at a time on the calling thread.
    Sequential,
    /// Worker-per-symbol on a pool of `workers` threads.
    Concurrent { workers: usize },
}

impl DispatchMode {
    /// Call ceiling used when none is configured.
    pub fn default_rate_ceiling(&self) -> u32 {
        match self {
            DispatchMode::Sequential => SEQUENTIAL_RATE_CEILING,
            DispatchMode::Concurrent { .. } => CONCURRENT_RATE_CEILING,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub exchange: Exchange,
    pub mode: DispatchMode,
    /// Calls per rate window; `None` picks the mode's default.
    pub rate_ceiling: Option<u32>,
    pub rate_window: std::time::Duration,
    /// Overrides the provider's own maximum request span.
    pub max_chunk: Option<Duration>,
    /// Zero the call counter at the start of every batch.
    pub reset_budget: bool,
    pub retry: RetryPolicy,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            exchange: Exchange::default(),
            mode: DispatchMode::Sequential,
            rate_ceiling: None,
            rate_window: DEFAULT_RATE_WINDOW,
            max_chunk: None,
            reset_budget: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl BatchOptions {
    pub fn effective_rate_ceiling(&self) -> u32 {
        self.rate_ceiling
            .unwrap_or_else(|| self.mode.default_rate_ceiling())
    }
}

/// One symbol and the window to fetch for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJob {
    pub symbol: String,
    pub window: FetchWindow,
}

impl FetchJob {
    pub fn new(symbol: impl Into<String>, window: FetchWindow) -> Self {
        Self {
            symbol: symbol.into(),
            window,
        }
    }
}

/// Result of a batch: completed series plus per-symbol failures.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub series: BTreeMap<String, Series>,
    pub failures: Vec<(String, SymbolError)>,
    /// Provider calls issued during this batch, retries included.
    pub calls: u64,
    /// Rate-budget pauses taken during this batch.
    pub pauses: u64,
}

impl BatchOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.series.len()
    }
}

pub struct BatchFetcher {
    provider: Arc<dyn CandleProvider>,
    directory: Arc<SymbolDirectory>,
    limiter: Arc<RateLimiter>,
    sleeper: Arc<dyn Sleeper>,
    options: BatchOptions,
}

impl BatchFetcher {
    pub fn new(
        provider: Arc<dyn CandleProvider>,
        directory: Arc<SymbolDirectory>,
        options: BatchOptions,
    ) -> Self {
        Self::with_sleeper(provider, directory, options, Arc::new(ThreadSleeper))
    }

    /// Like [`BatchFetcher::new`], with rate pauses and retry backoff routed
    /// through `sleeper`.
    pub fn with_sleeper(
        provider: Arc<dyn CandleProvider>,
        directory: Arc<SymbolDirectory>,
        options: BatchOptions,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::with_sleeper(
            options.effective_rate_ceiling(),
            options.rate_window,
            Arc::clone(&sleeper),
        ));
        Self {
            provider,
            directory,
            limiter,
            sleeper,
            options,
        }
    }

    /// Share an existing limiter, e.g. across several batches against one provider.
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn directory(&self) -> &SymbolDirectory {
        &self.directory
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Fetch every symbol over the same window.
    pub fn fetch_all<S: AsRef<str>>(
        &self,
        symbols: &[S],
        window: FetchWindow,
        progress: &dyn FetchProgress,
    ) -> Result<BatchOutcome, BatchError> {
        let jobs: Vec<FetchJob> = symbols
            .iter()
            .map(|s| FetchJob::new(s.as_ref(), window))
            .collect();
        self.fetch_jobs(jobs, progress)
    }

    /// Fetch each job's own window. Duplicate symbols run once (first wins).
    pub fn fetch_jobs(
        &self,
        jobs: Vec<FetchJob>,
        progress: &dyn FetchProgress,
    ) -> Result<BatchOutcome, BatchError> {
        let mut seen = HashSet::new();
        let jobs: Vec<FetchJob> = jobs
            .into_iter()
            .filter(|j| seen.insert(j.symbol.clone()))
            .collect();

        if self.options.reset_budget {
            self.limiter.reset();
        }
        let calls_before = self.limiter.calls();
        let pauses_before = self.limiter.pauses();

        tracing::info!(
            provider = self.provider.name(),
            symbols = jobs.len(),
            mode = ?self.options.mode,
            ceiling = self.limiter.ceiling(),
            "starting batch"
        );

        let results = match self.options.mode {
            DispatchMode::Sequential => self.run_sequential(&jobs, progress),
            DispatchMode::Concurrent { workers } => {
                self.run_concurrent(&jobs, workers, progress)?
            }
        };

        let mut outcome = BatchOutcome::default();
        for (symbol, result) in results {
            match result {
                Ok(series) => {
                    outcome.series.insert(symbol, series);
                }
                Err(e) => outcome.failures.push((symbol, e)),
            }
        }
        outcome.calls = self.limiter.calls() - calls_before;
        outcome.pauses = self.limiter.pauses() - pauses_before;

        progress.on_batch_complete(outcome.succeeded(), outcome.failures.len(), jobs.len());
        Ok(outcome)
    }

    fn run_sequential(
        &self,
        jobs: &[FetchJob],
        progress: &dyn FetchProgress,
    ) -> Vec<(String, Result<Series, SymbolError>)> {
        let total = jobs.len();
        jobs.iter()
            .enumerate()
            .map(|(index, job)| (job.symbol.clone(), self.run_job(job, index, total, progress)))
            .collect()
    }

    fn run_concurrent(
        &self,
        jobs: &[FetchJob],
        workers: usize,
        progress: &dyn FetchProgress,
    ) -> Result<Vec<(String, Result<Series, SymbolError>)>, BatchError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("niftyfetch-worker-{i}"))
            .build()
            .map_err(|e| BatchError::WorkerPool(e.to_string()))?;

        let total = jobs.len();
        let (tx, rx) = mpsc::channel();

        // scope() returns only after every spawned job has finished
        pool.scope(|scope| {
            for (index, job) in jobs.iter().enumerate() {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let result = self.run_job(job, index, total, progress);
                    let _ = tx.send((index, result));
                });
            }
        });
        drop(tx);

        let mut indexed: Vec<(usize, Result<Series, SymbolError>)> = rx.into_iter().collect();
        indexed.sort_by_key(|(index, _)| *index);
        Ok(indexed
            .into_iter()
            .map(|(index, result)| (jobs[index].symbol.clone(), result))
            .collect())
    }

    fn run_job(
        &self,
        job: &FetchJob,
        index: usize,
        total: usize,
        progress: &dyn FetchProgress,
    ) -> Result<Series, SymbolError> {
        progress.on_start(&job.symbol, index, total);
        let result = self.fetch_symbol(job);
        progress.on_complete(&job.symbol, index, total, result.as_ref().map(Series::len));
        result
    }

    /// Fetch one symbol chunk by chunk and stitch the fragments together.
    pub fn fetch_symbol(&self, job: &FetchJob) -> Result<Series, SymbolError> {
        let provider_id = self
            .directory
            .resolve(&job.symbol)
            .ok_or_else(|| SymbolError::UnknownSymbol(job.symbol.clone()))?;

        let chunks = match self.chunk_span(job.window.interval()) {
            Some(span) => job.window.chunks(span)?,
            None => vec![job.window],
        };

        let mut fragments = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let request = FetchRequest {
                provider_id,
                exchange: self.options.exchange,
                window: *chunk,
            };
            let fragment = self.fetch_with_retry(&job.symbol, &request)?;
            tracing::debug!(
                symbol = %job.symbol,
                start = %chunk.start(),
                end = %chunk.end(),
                rows = fragment.len(),
                "chunk fetched"
            );
            // Providers with inclusive end dates may return rows past the chunk
            fragments.push(fragment.clip(chunk.start(), chunk.end()));
        }

        let series = Series::concat(job.window.interval().granularity(), &fragments);
        Ok(drop_void_rows(&job.symbol, series))
    }

    fn chunk_span(&self, interval: Interval) -> Option<Duration> {
        self.options
            .max_chunk
            .or_else(|| self.provider.max_window(interval))
    }

    fn fetch_with_retry(
        &self,
        symbol: &str,
        request: &FetchRequest<'_>,
    ) -> Result<Series, SymbolError> {
        let policy = self.options.retry;
        let mut retry = 0;
        loop {
            self.limiter.acquire();
            match self.provider.fetch_candles(request) {
                Ok(series) => return Ok(series),
                Err(e) if e.is_transient() && retry < policy.max_retries => {
                    retry += 1;
                    let hint = match &e {
                        FetchError::RateLimited { retry_after_secs } => {
                            Some(std::time::Duration::from_secs(*retry_after_secs))
                        }
                        _ => None,
                    };
                    let delay = policy.delay_for(retry, hint);
                    tracing::warn!(
                        symbol,
                        retry,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient fetch error, retrying"
                    );
                    self.sleeper.sleep(delay);
                }
                Err(source) => {
                    return Err(SymbolError::Fetch {
                        start: request.window.start(),
                        end: request.window.end(),
                        source,
                    })
                }
            }
        }
    }
}

/// Drop rows without a usable price and flag rows whose range is inverted.
fn drop_void_rows(symbol: &str, series: Series) -> Series {
    let insane = series
        .candles()
        .iter()
        .filter(|c| !c.is_void() && !c.is_sane())
        .count();
    if insane > 0 {
        tracing::warn!(symbol, rows = insane, "candles with inconsistent OHLC range");
    }
    if !series.candles().iter().any(|c| c.is_void()) {
        return series;
    }
    let granularity = series.granularity();
    let before = series.len();
    let kept: Vec<_> = series
        .candles()
        .iter()
        .filter(|c| !c.is_void())
        .copied()
        .collect();
    tracing::warn!(symbol, dropped = before - kept.len(), "dropped candles without prices");
    Series::new(granularity, kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use niftyfetch_core::data::RecordingSleeper;
    use niftyfetch_core::domain::Candle;
    use std::sync::Mutex;

    struct FlakyProvider {
        failures_left: Mutex<u32>,
        error: fn() -> FetchError,
    }

    impl CandleProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        fn fetch_candles(&self, request: &FetchRequest<'_>) -> Result<Series, FetchError> {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err((self.error)());
            }
            Ok(Series::new(
                request.window.interval().granularity(),
                vec![Candle {
                    timestamp: request.window.start(),
                    open: 1.0,
                    high: 1.0,
                    low: 1.0,
                    close: 1.0,
                    volume: 1.0,
                }],
            ))
        }

        fn max_window(&self, _interval: Interval) -> Option<Duration> {
            None
        }
    }

    fn window() -> FetchWindow {
        FetchWindow::from_dates(
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 1, 10).unwrap(),
            Interval::Day1,
        )
        .unwrap()
    }

    fn fetcher(provider: FlakyProvider, retry: RetryPolicy) -> (BatchFetcher, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::new());
        let options = BatchOptions {
            retry,
            ..BatchOptions::default()
        };
        let fetcher = BatchFetcher::with_sleeper(
            Arc::new(provider),
            Arc::new(SymbolDirectory::identity(&["ABC"])),
            options,
            sleeper.clone(),
        );
        (fetcher, sleeper)
    }

    #[test]
    fn transient_errors_are_retried() {
        let provider = FlakyProvider {
            failures_left: Mutex::new(2),
            error: || FetchError::Timeout("slow".into()),
        };
        let (fetcher, sleeper) = fetcher(provider, RetryPolicy::default());

        let series = fetcher.fetch_symbol(&FetchJob::new("ABC", window())).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(fetcher.limiter().calls(), 3);
        assert_eq!(sleeper.pauses().len(), 2);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let provider = FlakyProvider {
            failures_left: Mutex::new(1),
            error: || FetchError::Provider {
                message: "no such scrip".into(),
            },
        };
        let (fetcher, sleeper) = fetcher(provider, RetryPolicy::default());

        let err = fetcher.fetch_symbol(&FetchJob::new("ABC", window())).unwrap_err();
        assert!(matches!(err, SymbolError::Fetch { .. }));
        assert_eq!(fetcher.limiter().calls(), 1);
        assert!(sleeper.pauses().is_empty());
    }

    #[test]
    fn retries_are_bounded() {
        let provider = FlakyProvider {
            failures_left: Mutex::new(10),
            error: || FetchError::Network("down".into()),
        };
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: std::time::Duration::from_millis(10),
        };
        let (fetcher, _) = fetcher(provider, policy);

        assert!(fetcher.fetch_symbol(&FetchJob::new("ABC", window())).is_err());
        assert_eq!(fetcher.limiter().calls(), 3);
    }

    #[test]
    fn rate_limited_honours_retry_after() {
        let provider = FlakyProvider {
            failures_left: Mutex::new(1),
            error: || FetchError::RateLimited {
                retry_after_secs: 7,
            },
        };
        let (fetcher, sleeper) = fetcher(provider, RetryPolicy::default());

        fetcher.fetch_symbol(&FetchJob::new("ABC", window())).unwrap();
        assert_eq!(sleeper.pauses(), vec![std::time::Duration::from_secs(7)]);
    }

    #[test]
    fn unknown_symbol_makes_no_call() {
        let provider = FlakyProvider {
            failures_left: Mutex::new(0),
            error: || FetchError::SessionExpired,
        };
        let (fetcher, _) = fetcher(provider, RetryPolicy::none());

        let err = fetcher.fetch_symbol(&FetchJob::new("NOPE", window())).unwrap_err();
        assert!(matches!(err, SymbolError::UnknownSymbol(ref s) if s == "NOPE"));
        assert_eq!(fetcher.limiter().calls(), 0);
    }

    #[test]
    fn default_ceiling_follows_mode() {
        let mut options = BatchOptions::default();
        assert_eq!(options.effective_rate_ceiling(), 50);
        options.mode = DispatchMode::Concurrent { workers: 4 };
        assert_eq!(options.effective_rate_ceiling(), 500);
        options.rate_ceiling = Some(12);
        assert_eq!(options.effective_rate_ceiling(), 12);
    }

    #[test]
    fn priceless_rows_are_dropped_and_inverted_rows_kept() {
        let at = |d: u32| {
            NaiveDate::from_ymd_opt(2023, 1, d)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        };
        let candle = |d: u32, close: f64, high: f64| Candle {
            timestamp: at(d),
            open: 10.0,
            high,
            low: 9.0,
            close,
            volume: 100.0,
        };
        let series = Series::new(
            niftyfetch_core::domain::Granularity::Daily,
            vec![candle(2, 10.5, 11.0), candle(3, f64::NAN, 11.0), candle(4, 10.5, 8.0)],
        );

        let cleaned = drop_void_rows("ABC", series);
        let days: Vec<_> = cleaned.candles().iter().map(|c| c.timestamp).collect();
        assert_eq!(days, vec![at(2), at(4)]);
    }
}
