//! NiftyFetch Runner: batch orchestration, incremental updates, run configuration.
//!
//! This crate builds on `niftyfetch-core` to provide:
//! - Rate-limited batch fetcher (sequential or worker pool)
//! - Full-download and incremental-update drivers
//! - TOML run configuration with environment overrides
//! - Progress reporting

pub mod batch;
pub mod config;
pub mod progress;
pub mod update;

pub use batch::{
    BatchError, BatchFetcher, BatchOptions, BatchOutcome, DispatchMode, FetchJob, SymbolError,
};
pub use config::{ConfigError, ProviderKind, RunConfig, StorageBackend};
pub use progress::{FetchProgress, LogProgress, NoProgress};
pub use update::{download, update, RunReport, UpdatePlan};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn batch_fetcher_is_send_sync() {
        assert_send::<BatchFetcher>();
        assert_sync::<BatchFetcher>();
    }

    #[test]
    fn outcomes_are_send() {
        assert_send::<BatchOutcome>();
        assert_send::<RunReport>();
        assert_send::<SymbolError>();
    }

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<RunConfig>();
        assert_sync::<RunConfig>();
        assert_send::<BatchOptions>();
        assert_sync::<BatchOptions>();
    }
}
