//! Fetch windows and provider-sized chunking.

use super::interval::Interval;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest span the brokerage accepts per historical request.
pub const DEFAULT_MAX_CHUNK_DAYS: i64 = 175;

/// Start of history for symbols that have never been downloaded.
pub fn default_history_start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2019, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("empty fetch window: start {start} is not before end {end}")]
    Empty {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },

    #[error("chunk span must be positive, got {0}")]
    NonPositiveChunk(Duration),
}

/// Half-open `[start, end)` range plus the requested bar size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    start: NaiveDateTime,
    end: NaiveDateTime,
    interval: Interval,
}

impl FetchWindow {
    pub fn new(
        start: NaiveDateTime,
        end: NaiveDateTime,
        interval: Interval,
    ) -> Result<Self, WindowError> {
        if start >= end {
            return Err(WindowError::Empty { start, end });
        }
        Ok(Self {
            start,
            end,
            interval,
        })
    }

    /// Window covering whole calendar days `[start, end)`.
    pub fn from_dates(
        start: NaiveDate,
        end: NaiveDate,
        interval: Interval,
    ) -> Result<Self, WindowError> {
        Self::new(start.and_time(Default::default()), end.and_time(Default::default()), interval)
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn span(&self) -> Duration {
        self.end - self.start
    }

    /// Split into consecutive sub-windows no longer than `max_span`.
    ///
    /// Yields `ceil(span / max_span)` windows; the last one ends exactly at
    /// `self.end`. A window already within the limit comes back unchanged.
    pub fn chunks(&self, max_span: Duration) -> Result<Vec<FetchWindow>, WindowError> {
        if max_span <= Duration::zero() {
            return Err(WindowError::NonPositiveChunk(max_span));
        }

        let mut out = Vec::new();
        let mut cursor = self.start;
        while cursor < self.end {
            let next = match cursor.checked_add_signed(max_span) {
                Some(t) if t < self.end => t,
                _ => self.end,
            };
            out.push(FetchWindow {
                start: cursor,
                end: next,
                interval: self.interval,
            });
            cursor = next;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn rejects_empty_window() {
        let t = date(2023, 1, 1).and_hms_opt(0, 0, 0).unwrap();
        assert!(matches!(
            FetchWindow::new(t, t, Interval::Day1),
            Err(WindowError::Empty { .. })
        ));
    }

    #[test]
    fn short_window_is_single_chunk() {
        let w = FetchWindow::from_dates(date(2023, 1, 1), date(2023, 1, 10), Interval::Day1).unwrap();
        let chunks = w.chunks(Duration::days(DEFAULT_MAX_CHUNK_DAYS)).unwrap();
        assert_eq!(chunks, vec![w]);
    }

    #[test]
    fn long_window_splits_into_contiguous_chunks() {
        let w =
            FetchWindow::from_dates(date(2019, 1, 1), date(2023, 5, 25), Interval::Minute15).unwrap();
        let chunks = w.chunks(Duration::days(175)).unwrap();

        let days = w.span().num_days();
        assert_eq!(chunks.len() as i64, (days + 174) / 175);
        assert_eq!(chunks[0].start(), w.start());
        assert_eq!(chunks.last().unwrap().end(), w.end());
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start());
            assert_eq!(pair[0].span(), Duration::days(175));
        }
    }

    #[test]
    fn exact_multiple_has_no_trailing_sliver() {
        let w = FetchWindow::from_dates(date(2023, 1, 1), date(2023, 1, 21), Interval::Day1).unwrap();
        let chunks = w.chunks(Duration::days(10)).unwrap();
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn rejects_zero_chunk() {
        let w = FetchWindow::from_dates(date(2023, 1, 1), date(2023, 1, 2), Interval::Day1).unwrap();
        assert!(w.chunks(Duration::zero()).is_err());
    }
}
