//! CSV directory backend.
//!
//! Layout: `{dir}/{file_key(symbol)}.csv`, header
//! `Date|Datetime,Open,High,Low,Close,Volume`.
//!
//! Writes are atomic (write to `.csv.tmp`, rename into place). Loading accepts
//! files written by older pandas-based tooling: offset-suffixed timestamps,
//! extra trailing columns such as `Dividends`, and unsorted rows.

use super::{file_key, format_number, parse_number, SeriesStore, StoreError};
use crate::domain::{parse_timestamp, Candle, Granularity, Series};
use std::fs;
use std::path::{Path, PathBuf};

pub const PRICE_COLUMNS: [&str; 5] = ["Open", "High", "Low", "Close", "Volume"];

pub struct CsvStore {
    dir: PathBuf,
}

impl CsvStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{dir}/{file_key(symbol)}.csv`
    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", file_key(symbol)))
    }

    fn read_file(path: &Path, fallback: Granularity) -> Result<Series, StoreError> {
        let location = path.display().to_string();
        let csv_err = |source| StoreError::Csv {
            path: location.clone(),
            source,
        };

        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(csv_err)?;

        let headers = rdr.headers().map_err(csv_err)?.clone();
        if headers.is_empty() {
            return Ok(Series::empty(fallback));
        }
        let granularity = headers
            .get(0)
            .and_then(Granularity::from_column)
            .ok_or_else(|| StoreError::BadHeader {
                location: location.clone(),
            })?;

        // Price columns by name; pandas output may add columns after Volume
        let mut idx = [0usize; 5];
        for (slot, name) in idx.iter_mut().zip(PRICE_COLUMNS) {
            *slot = headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(name))
                .ok_or_else(|| StoreError::BadRow {
                    location: location.clone(),
                    row: 0,
                    reason: format!("missing column '{name}'"),
                })?;
        }

        let mut candles = Vec::new();
        for (i, record) in rdr.records().enumerate() {
            let record = record.map_err(csv_err)?;
            let row = i + 1;
            let bad = |reason: String| StoreError::BadRow {
                location: location.clone(),
                row,
                reason,
            };

            let raw_ts = record.get(0).unwrap_or_default();
            let timestamp =
                parse_timestamp(raw_ts).ok_or_else(|| bad(format!("bad timestamp '{raw_ts}'")))?;
            let field = |k: usize| parse_number(record.get(idx[k]).unwrap_or_default());

            candles.push(Candle {
                timestamp,
                open: field(0).map_err(&bad)?,
                high: field(1).map_err(&bad)?,
                low: field(2).map_err(&bad)?,
                close: field(3).map_err(&bad)?,
                volume: field(4).map_err(&bad)?,
            });
        }

        Ok(Series::new(granularity, candles))
    }

    fn write_file(path: &Path, series: &Series) -> Result<(), StoreError> {
        let location = path.display().to_string();
        let csv_err = |source| StoreError::Csv {
            path: location.clone(),
            source,
        };

        let granularity = series.granularity();
        let mut wtr = csv::Writer::from_path(path).map_err(csv_err)?;
        wtr.write_record(
            std::iter::once(granularity.timestamp_column()).chain(PRICE_COLUMNS),
        )
        .map_err(csv_err)?;

        let fmt = granularity.timestamp_format();
        for c in series.candles() {
            wtr.write_record([
                c.timestamp.format(fmt).to_string(),
                format_number(c.open),
                format_number(c.high),
                format_number(c.low),
                format_number(c.close),
                format_number(c.volume),
            ])
            .map_err(csv_err)?;
        }

        wtr.flush().map_err(|source| StoreError::Io {
            path: location.clone(),
            source,
        })
    }
}

impl SeriesStore for CsvStore {
    fn load(&self, symbol: &str, granularity: Granularity) -> Result<Series, StoreError> {
        let path = self.path_for(symbol);
        if !path.is_file() {
            return Ok(Series::empty(granularity));
        }
        Self::read_file(&path, granularity)
    }

    fn save(&self, symbol: &str, series: &Series) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.display().to_string(),
            source,
        })?;

        let path = self.path_for(symbol);
        let tmp_path = path.with_extension("csv.tmp");
        Self::write_file(&tmp_path, series)?;

        // Atomic rename
        fs::rename(&tmp_path, &path).map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::Io {
                path: path.display().to_string(),
                source,
            }
        })?;

        tracing::debug!(symbol, rows = series.len(), path = %path.display(), "saved series");
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.display().to_string(),
            source,
        })?;

        let mut keys: Vec<String> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("csv"))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(String::from))
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn describe(&self) -> String {
        format!("csv:{}", self.dir.display())
    }
}
