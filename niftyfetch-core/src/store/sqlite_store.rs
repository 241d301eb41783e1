//! SQLite backend: one table per symbol, named by [`table_key`].
//!
//! Table layout mirrors the CSV header: a TEXT timestamp column called
//! `Date` or `Datetime` (primary key) followed by REAL price columns.

use super::{table_key, SeriesStore, StoreError};
use crate::domain::{parse_timestamp, Candle, Granularity, Series};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file, creating parent directories.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(&path)?;
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Timestamp column of an existing table, or `None` if the table is absent.
    fn timestamp_column(conn: &Connection, table: &str) -> Result<Option<String>, StoreError> {
        let exists: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Ok(None);
        }

        let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns.into_iter().next())
    }
}

impl SeriesStore for SqliteStore {
    fn load(&self, symbol: &str, granularity: Granularity) -> Result<Series, StoreError> {
        let table = table_key(symbol);
        let conn = self.conn();

        let Some(column) = Self::timestamp_column(&conn, &table)? else {
            return Ok(Series::empty(granularity));
        };
        let stored = Granularity::from_column(&column).ok_or_else(|| StoreError::BadHeader {
            location: format!("{}:{table}", self.path.display()),
        })?;

        let mut stmt = conn.prepare(&format!(
            "SELECT \"{column}\", Open, High, Low, Close, Volume FROM \"{table}\" ORDER BY \"{column}\""
        ))?;
        let rows = stmt
            .query_map([], |row| {
                let price = |i: usize| -> rusqlite::Result<f64> {
                    Ok(row.get::<_, Option<f64>>(i)?.unwrap_or(f64::NAN))
                };
                Ok((
                    row.get::<_, String>(0)?,
                    price(1)?,
                    price(2)?,
                    price(3)?,
                    price(4)?,
                    price(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut candles = Vec::with_capacity(rows.len());
        for (i, (raw, open, high, low, close, volume)) in rows.into_iter().enumerate() {
            let timestamp = parse_timestamp(&raw).ok_or_else(|| StoreError::BadRow {
                location: format!("{}:{table}", self.path.display()),
                row: i + 1,
                reason: format!("bad timestamp '{raw}'"),
            })?;
            candles.push(Candle {
                timestamp,
                open,
                high,
                low,
                close,
                volume,
            });
        }

        Ok(Series::new(stored, candles))
    }

    fn save(&self, symbol: &str, series: &Series) -> Result<(), StoreError> {
        let table = table_key(symbol);
        let granularity = series.granularity();
        let column = granularity.timestamp_column();
        let fmt = granularity.timestamp_format();

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(&format!("DROP TABLE IF EXISTS \"{table}\""), [])?;
        tx.execute(
            &format!(
                "CREATE TABLE \"{table}\" (
                    \"{column}\" TEXT PRIMARY KEY,
                    Open REAL, High REAL, Low REAL, Close REAL, Volume REAL
                )"
            ),
            [],
        )?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO \"{table}\" VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            ))?;
            let nan_to_null = |v: f64| if v.is_nan() { None } else { Some(v) };
            for c in series.candles() {
                stmt.execute(params![
                    c.timestamp.format(fmt).to_string(),
                    nan_to_null(c.open),
                    nan_to_null(c.high),
                    nan_to_null(c.low),
                    nan_to_null(c.close),
                    nan_to_null(c.volume),
                ])?;
            }
        }
        tx.commit()?;

        tracing::debug!(symbol, table = %table, rows = series.len(), "saved series");
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}
