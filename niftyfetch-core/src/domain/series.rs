//! Series: a per-symbol, time-ordered run of candles, and the merger.
//!
//! Invariant: timestamps are strictly increasing. Every constructor goes
//! through [`Series::new`], which stable-sorts and drops repeated timestamps
//! keeping the first occurrence.

use super::candle::Candle;
use super::interval::Granularity;
use chrono::NaiveDateTime;

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    granularity: Granularity,
    candles: Vec<Candle>,
}

impl Series {
    /// Build a series from candles in any order.
    pub fn new(granularity: Granularity, mut candles: Vec<Candle>) -> Self {
        // sort_by_key is stable, so "first occurrence" survives the sort
        candles.sort_by_key(|c| c.timestamp);
        candles.dedup_by_key(|c| c.timestamp);
        Self {
            granularity,
            candles,
        }
    }

    pub fn empty(granularity: Granularity) -> Self {
        Self {
            granularity,
            candles: Vec::new(),
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn into_candles(self) -> Vec<Candle> {
        self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.candles.first().map(|c| c.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.candles.last().map(|c| c.timestamp)
    }

    /// Rows with `start <= timestamp < end`.
    pub fn clip(&self, start: NaiveDateTime, end: NaiveDateTime) -> Series {
        let lo = self.candles.partition_point(|c| c.timestamp < start);
        let hi = self.candles.partition_point(|c| c.timestamp < end);
        Series {
            granularity: self.granularity,
            candles: self.candles[lo..hi.max(lo)].to_vec(),
        }
    }

    /// Rows at or after `ts`.
    pub fn since(&self, ts: NaiveDateTime) -> &[Candle] {
        let lo = self.candles.partition_point(|c| c.timestamp < ts);
        &self.candles[lo..]
    }

    /// Merge a previously persisted series with freshly fetched rows.
    ///
    /// `existing` is placed first, so on an exact timestamp collision the
    /// existing row wins. `merge(s, s) == s` for every series.
    pub fn merge(existing: &Series, incoming: &Series) -> Series {
        let granularity = if existing.is_empty() {
            incoming.granularity
        } else {
            existing.granularity
        };

        // Fast path: strictly appending rows after the last existing timestamp
        if let (Some(last), Some(first_new)) = (existing.last_timestamp(), incoming.first_timestamp())
        {
            if first_new > last {
                let mut candles = Vec::with_capacity(existing.len() + incoming.len());
                candles.extend_from_slice(&existing.candles);
                candles.extend_from_slice(&incoming.candles);
                return Series {
                    granularity,
                    candles,
                };
            }
        }

        let mut candles = Vec::with_capacity(existing.len() + incoming.len());
        candles.extend_from_slice(&existing.candles);
        candles.extend_from_slice(&incoming.candles);
        Series::new(granularity, candles)
    }

    /// Concatenate fragments in order, then sort and drop duplicate timestamps.
    ///
    /// On a collision the row from the earlier fragment wins, as with
    /// [`Series::merge`].
    pub fn concat<'a, I>(granularity: Granularity, fragments: I) -> Series
    where
        I: IntoIterator<Item = &'a Series>,
    {
        let mut candles = Vec::new();
        for fragment in fragments {
            candles.extend_from_slice(&fragment.candles);
        }
        Series::new(granularity, candles)
    }
}
