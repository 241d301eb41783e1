//! NiftyFetch Core: candles, series merging, fetch windows, providers, persistence.
//!
//! This crate holds everything that does not orchestrate a batch:
//! - Domain types (candles, intervals, series, fetch windows)
//! - Symbol directory (ticker → provider id)
//! - Market-data providers (5paisa, Yahoo) behind one trait
//! - Shared call-budget limiter and retry policy
//! - CSV and SQLite series stores

pub mod data;
pub mod domain;
pub mod store;
