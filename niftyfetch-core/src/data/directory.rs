//! Symbol directory: the ticker list and its provider identifiers.
//!
//! Yahoo identifies NSE listings by ticker plus an exchange suffix
//! (`RELIANCE.NS`); the brokerage uses numeric scrip codes loaded from a
//! two-column lookup file (`RELIANCE,2885`).

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Nifty-50 constituents, without exchange suffix.
pub const NIFTY50: [&str; 50] = [
    "ADANIENT", "ADANIPORTS", "APOLLOHOSP", "ASIANPAINT", "AXISBANK",
    "BAJAJ-AUTO", "BAJFINANCE", "BAJAJFINSV", "BPCL", "BHARTIARTL",
    "BRITANNIA", "CIPLA", "COALINDIA", "DIVISLAB", "DRREDDY",
    "EICHERMOT", "GRASIM", "HCLTECH", "HDFCBANK", "HDFCLIFE",
    "HEROMOTOCO", "HINDALCO", "HINDUNILVR", "HDFC", "ICICIBANK",
    "ITC", "INDUSINDBK", "INFY", "JSWSTEEL", "KOTAKBANK",
    "LT", "M&M", "MARUTI", "NTPC", "NESTLEIND",
    "ONGC", "POWERGRID", "RELIANCE", "SBILIFE", "SBIN",
    "SUNPHARMA", "TCS", "TATACONSUM", "TATAMOTORS", "TATASTEEL",
    "TECHM", "TITAN", "UPL", "ULTRACEMCO", "WIPRO",
];

/// Yahoo suffix for NSE listings.
pub const NSE_SUFFIX: &str = ".NS";

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("read lookup file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse lookup file: {0}")]
    Csv(#[from] csv::Error),

    #[error("lookup row {line} needs a symbol and an identifier")]
    MalformedRow { line: u64 },
}

/// Ordered symbols plus symbol → provider identifier mapping.
#[derive(Debug, Clone, Default)]
pub struct SymbolDirectory {
    symbols: Vec<String>,
    ids: HashMap<String, String>,
}

impl SymbolDirectory {
    /// Directory whose identifiers are the symbols themselves.
    pub fn identity<S: AsRef<str>>(symbols: &[S]) -> Self {
        Self::with_suffix(symbols, "")
    }

    /// Directory whose identifier is `symbol + suffix`.
    pub fn with_suffix<S: AsRef<str>>(symbols: &[S], suffix: &str) -> Self {
        let mut dir = Self::default();
        for s in symbols {
            let s = s.as_ref();
            dir.insert(s, format!("{s}{suffix}"));
        }
        dir
    }

    /// The built-in Nifty-50 list for Yahoo Finance.
    pub fn nifty50_yahoo() -> Self {
        Self::with_suffix(&NIFTY50, NSE_SUFFIX)
    }

    /// Load a header-less `symbol,identifier` file.
    pub fn from_lookup_file(path: &Path) -> Result<Self, DirectoryError> {
        let file = File::open(path).map_err(|source| DirectoryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_lookup_reader(file)
    }

    pub fn from_lookup_reader<R: Read>(reader: R) -> Result<Self, DirectoryError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut dir = Self::default();
        for record in rdr.records() {
            let record = record?;
            if record.iter().all(|f| f.is_empty()) {
                continue;
            }
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            match (record.get(0), record.get(1)) {
                (Some(sym), Some(id)) if !sym.is_empty() && !id.is_empty() => {
                    dir.insert(sym, id.to_string());
                }
                _ => return Err(DirectoryError::MalformedRow { line }),
            }
        }
        Ok(dir)
    }

    /// Add or replace a mapping. The first insertion fixes the order.
    pub fn insert(&mut self, symbol: &str, provider_id: String) {
        if self.ids.insert(symbol.to_string(), provider_id).is_none() {
            self.symbols.push(symbol.to_string());
        }
    }

    pub fn resolve(&self, symbol: &str) -> Option<&str> {
        self.ids.get(symbol).map(|s| s.as_str())
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.ids.contains_key(symbol)
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// `RELIANCE.NS` → `RELIANCE`; anything without a dot is returned as is.
pub fn strip_exchange_suffix(symbol: &str) -> &str {
    symbol.split('.').next().unwrap_or(symbol)
}
