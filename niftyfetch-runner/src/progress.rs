//! Progress reporting for batch fetches.

use crate::batch::SymbolError;

/// Trait for reporting per-symbol progress.
///
/// In concurrent mode callbacks arrive from worker threads in completion
/// order, so `index` is the symbol's position in the batch, not a sequence
/// number.
pub trait FetchProgress: Send + Sync {
    /// Called when a worker picks up a symbol.
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    /// Called when a symbol finishes; `Ok` carries the row count.
    fn on_complete(
        &self,
        symbol: &str,
        index: usize,
        total: usize,
        result: Result<usize, &SymbolError>,
    );

    /// Called once after every symbol has completed.
    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Reports through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl FetchProgress for LogProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        tracing::info!("[{}/{}] fetching {symbol}", index + 1, total);
    }

    fn on_complete(
        &self,
        symbol: &str,
        _index: usize,
        _total: usize,
        result: Result<usize, &SymbolError>,
    ) {
        match result {
            Ok(rows) => tracing::info!(symbol, rows, "fetched"),
            Err(e) => tracing::warn!(symbol, error = %e, "fetch failed"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        tracing::info!("batch complete: {succeeded}/{total} succeeded, {failed} failed");
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl FetchProgress for NoProgress {
    fn on_start(&self, _symbol: &str, _index: usize, _total: usize) {}

    fn on_complete(
        &self,
        _symbol: &str,
        _index: usize,
        _total: usize,
        _result: Result<usize, &SymbolError>,
    ) {
    }

    fn on_batch_complete(&self, _succeeded: usize, _failed: usize, _total: usize) {}
}
