//! Persistence adapter: one stored series per symbol.
//!
//! Two backends share the [`SeriesStore`] trait: a directory of CSV files
//! and a SQLite database with one table per symbol. Loading a symbol that
//! was never saved is not an error; it yields an empty series.

pub mod csv_store;
pub mod sqlite_store;

pub use csv_store::CsvStore;
pub use sqlite_store::SqliteStore;

use crate::domain::{Granularity, Series};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{location}: unrecognised header, expected Date or Datetime first")]
    BadHeader { location: String },

    #[error("{location} row {row}: {reason}")]
    BadRow {
        location: String,
        row: usize,
        reason: String,
    },
}

/// Load/save a symbol's series.
pub trait SeriesStore: Send + Sync {
    /// Stored series for `symbol`, or an empty series of `granularity` if none.
    fn load(&self, symbol: &str, granularity: Granularity) -> Result<Series, StoreError>;

    /// Replace whatever is stored for `symbol`.
    fn save(&self, symbol: &str, series: &Series) -> Result<(), StoreError>;

    /// Storage keys currently present.
    fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Where the data lives, for logs.
    fn describe(&self) -> String;
}

/// File stem for a symbol: keeps `[A-Za-z0-9._-]`, everything else becomes `_`.
pub fn file_key(symbol: &str) -> String {
    symbol
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// SQL table name for a symbol: keeps `[A-Za-z0-9_]`, everything else becomes `_`.
pub fn table_key(symbol: &str) -> String {
    symbol
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Shortest decimal that parses back to the same f64.
pub(crate) fn format_number(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else {
        format!("{v}")
    }
}

pub(crate) fn parse_number(raw: &str) -> Result<f64, String> {
    let s = raw.trim();
    if s.is_empty() {
        return Ok(f64::NAN);
    }
    s.parse::<f64>().map_err(|e| format!("'{s}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_replace_illegal_characters() {
        assert_eq!(file_key("M&M"), "M_M");
        assert_eq!(file_key("BAJAJ-AUTO"), "BAJAJ-AUTO");
        assert_eq!(file_key("RELIANCE.NS"), "RELIANCE.NS");
        assert_eq!(file_key("../etc"), ".._etc");
        assert_eq!(table_key("RELIANCE.NS"), "RELIANCE_NS");
        assert_eq!(table_key("BAJAJ-AUTO"), "BAJAJ_AUTO");
    }

    #[test]
    fn numbers_roundtrip_exactly() {
        for v in [0.1, 2552.05, 1e-7, 183_422.0, 1234.5678901234567] {
            assert_eq!(parse_number(&format_number(v)).unwrap(), v);
        }
        assert!(parse_number("").unwrap().is_nan());
        assert!(parse_number("abc").is_err());
    }
}
