//! Full-download and incremental-update drivers.
//!
//! Both drivers delegate fetching to [`BatchFetcher`] and persistence to a
//! [`SeriesStore`]. A symbol that fails to fetch or save is reported and
//! skipped; every other symbol still completes.

use crate::batch::{BatchError, BatchFetcher, BatchOutcome, FetchJob, SymbolError};
use crate::progress::FetchProgress;
use chrono::NaiveDateTime;
use niftyfetch_core::domain::{default_history_start, FetchWindow, Interval, Series};
use niftyfetch_core::store::SeriesStore;
use std::collections::{BTreeMap, HashSet};

/// What a driver run did.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Every series written by this run, keyed by symbol.
    pub saved: BTreeMap<String, Series>,
    /// Symbols that had no persisted data and were fetched from history start.
    pub first_time: Vec<String>,
    /// Symbols extended from their last persisted timestamp.
    pub incremental: Vec<String>,
    /// Symbols whose window was already empty; persisted data passed through.
    pub up_to_date: Vec<String>,
    pub failures: Vec<(String, SymbolError)>,
    pub calls: u64,
    pub pauses: u64,
}

impl RunReport {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    fn absorb_counters(&mut self, outcome: &BatchOutcome) {
        self.calls += outcome.calls;
        self.pauses += outcome.pauses;
    }
}

/// Fetch `window` for every symbol and overwrite whatever the store holds.
pub fn download<S: AsRef<str>>(
    fetcher: &BatchFetcher,
    store: &dyn SeriesStore,
    symbols: &[S],
    window: FetchWindow,
    progress: &dyn FetchProgress,
) -> Result<RunReport, BatchError> {
    let outcome = fetcher.fetch_all(symbols, window, progress)?;

    let mut report = RunReport::default();
    report.absorb_counters(&outcome);
    report.first_time = outcome.series.keys().cloned().collect();
    report.failures = outcome.failures;

    for (symbol, series) in outcome.series {
        match store.save(&symbol, &series) {
            Ok(()) => {
                report.saved.insert(symbol, series);
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "save failed");
                report.failures.push((symbol, e.into()));
            }
        }
    }

    tracing::info!(
        store = %store.describe(),
        saved = report.saved.len(),
        failed = report.failures.len(),
        calls = report.calls,
        pauses = report.pauses,
        "download finished"
    );
    Ok(report)
}

/// Inputs for an incremental update run.
pub struct UpdatePlan<'a> {
    pub symbols: Vec<String>,
    /// Where existing series are read from.
    pub load_store: &'a dyn SeriesStore,
    /// Where merged series are written to; may be the same store.
    pub save_store: &'a dyn SeriesStore,
    pub interval: Interval,
    /// Start for symbols with persisted data instead of their last timestamp.
    pub update_from: Option<NaiveDateTime>,
    /// Start for symbols with no persisted data.
    pub history_start: NaiveDateTime,
    /// Exclusive end of every fetch window.
    pub now: NaiveDateTime,
}

impl<'a> UpdatePlan<'a> {
    /// Plan reading and writing the same store, history from 2019-01-01.
    pub fn new(
        symbols: Vec<String>,
        store: &'a dyn SeriesStore,
        interval: Interval,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            symbols,
            load_store: store,
            save_store: store,
            interval,
            update_from: None,
            history_start: default_history_start(),
            now,
        }
    }
}

/// Extend every symbol's persisted series up to `plan.now`.
///
/// Symbols without persisted data are fetched from `history_start`; the
/// rest from `update_from` or their own last timestamp. The last persisted
/// row is refetched and the merge keeps the persisted copy, so it is never
/// duplicated.
pub fn update(
    fetcher: &BatchFetcher,
    plan: &UpdatePlan<'_>,
    progress: &dyn FetchProgress,
) -> Result<RunReport, BatchError> {
    let granularity = plan.interval.granularity();
    let mut report = RunReport::default();
    let mut existing: BTreeMap<String, Series> = BTreeMap::new();
    let mut first_jobs = Vec::new();
    let mut incremental_jobs = Vec::new();
    let mut seen = HashSet::new();

    for symbol in &plan.symbols {
        if !seen.insert(symbol.as_str()) {
            continue;
        }
        let stored = match plan.load_store.load(symbol, granularity) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "could not load persisted series");
                report.failures.push((symbol.clone(), e.into()));
                continue;
            }
        };

        // Merging into a Date-keyed series would truncate intraday times
        if !stored.is_empty() && stored.granularity() != granularity {
            let err = SymbolError::GranularityMismatch {
                stored: stored.granularity().timestamp_column().to_string(),
                requested: granularity.timestamp_column().to_string(),
            };
            tracing::warn!(symbol = %symbol, error = %err, "skipping symbol");
            report.failures.push((symbol.clone(), err));
            continue;
        }

        let (start, first_time) = match stored.last_timestamp() {
            None => (plan.history_start, true),
            Some(last) => (plan.update_from.unwrap_or(last), false),
        };

        if start >= plan.now {
            tracing::info!(symbol = %symbol, "already up to date");
            report.up_to_date.push(symbol.clone());
            existing.insert(symbol.clone(), stored);
            continue;
        }

        let window = match FetchWindow::new(start, plan.now, plan.interval) {
            Ok(w) => w,
            Err(e) => {
                report.failures.push((symbol.clone(), e.into()));
                continue;
            }
        };
        let job = FetchJob::new(symbol.clone(), window);
        if first_time {
            report.first_time.push(symbol.clone());
            first_jobs.push(job);
        } else {
            report.incremental.push(symbol.clone());
            incremental_jobs.push(job);
        }
        existing.insert(symbol.clone(), stored);
    }

    tracing::info!(
        first_time = first_jobs.len(),
        incremental = incremental_jobs.len(),
        up_to_date = report.up_to_date.len(),
        "update plan ready"
    );

    let mut fetched: BTreeMap<String, Series> = BTreeMap::new();
    for jobs in [first_jobs, incremental_jobs] {
        if jobs.is_empty() {
            continue;
        }
        let outcome = fetcher.fetch_jobs(jobs, progress)?;
        report.absorb_counters(&outcome);
        report.failures.extend(outcome.failures);
        fetched.extend(outcome.series);
    }

    for (symbol, stored) in existing {
        let merged = match fetched.get(&symbol) {
            Some(incoming) => Series::merge(&stored, incoming),
            None if report.up_to_date.contains(&symbol) => stored,
            // Fetch failed; leave the persisted series untouched
            None => continue,
        };

        match plan.save_store.save(&symbol, &merged) {
            Ok(()) => {
                report.saved.insert(symbol, merged);
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "save failed");
                report.failures.push((symbol, e.into()));
            }
        }
    }

    tracing::info!(
        store = %plan.save_store.describe(),
        saved = report.saved.len(),
        failed = report.failures.len(),
        calls = report.calls,
        pauses = report.pauses,
        "update finished"
    );
    Ok(report)
}
