//! Property tests for series and window invariants.
//!
//! Uses proptest to verify:
//! 1. Merge is idempotent and never loses or duplicates a timestamp
//! 2. Merged output does not depend on fragment arrival order
//! 3. Chunking covers the window exactly with ceil(W/C) pieces
//! 4. Clipping then merging chunk fragments reproduces the whole series

use chrono::{Duration, NaiveDate, NaiveDateTime};
use niftyfetch_core::domain::{Candle, FetchWindow, Granularity, Interval, Series};
use proptest::prelude::*;
use std::collections::BTreeSet;

// ── Helpers ──────────────────────────────────────────────────────────

fn base() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2019, 1, 1)
        .unwrap()
        .and_hms_opt(9, 15, 0)
        .unwrap()
}

fn candle_at(offset_min: i64, close: f64) -> Candle {
    Candle {
        timestamp: base() + Duration::minutes(offset_min),
        open: close,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 100.0,
    }
}

fn series_from(offsets: &[i64], tag: f64) -> Series {
    Series::new(
        Granularity::Intraday,
        offsets.iter().map(|&o| candle_at(o, tag)).collect(),
    )
}

fn timestamps(series: &Series) -> Vec<NaiveDateTime> {
    series.candles().iter().map(|c| c.timestamp).collect()
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_offsets() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0..5_000i64, 0..80)
}

// ── 1. Merge idempotence and uniqueness ──────────────────────────────

proptest! {
    #[test]
    fn merge_with_self_is_identity(offsets in arb_offsets()) {
        let s = series_from(&offsets, 1.0);
        prop_assert_eq!(Series::merge(&s, &s), s);
    }

    /// Output timestamps are exactly the union of inputs, strictly increasing.
    #[test]
    fn merge_is_sorted_union(a in arb_offsets(), b in arb_offsets()) {
        let sa = series_from(&a, 1.0);
        let sb = series_from(&b, 2.0);
        let merged = Series::merge(&sa, &sb);

        let ts = timestamps(&merged);
        prop_assert!(ts.windows(2).all(|w| w[0] < w[1]));

        let expected: BTreeSet<_> = timestamps(&sa).into_iter().chain(timestamps(&sb)).collect();
        prop_assert_eq!(ts, expected.into_iter().collect::<Vec<_>>());
    }

    /// On collision the existing row's values are kept.
    #[test]
    fn merge_prefers_existing(a in arb_offsets(), b in arb_offsets()) {
        let existing = series_from(&a, 1.0);
        let incoming = series_from(&b, 2.0);
        let merged = Series::merge(&existing, &incoming);
        let kept: BTreeSet<_> = timestamps(&existing).into_iter().collect();

        for c in merged.candles() {
            let want = if kept.contains(&c.timestamp) { 1.0 } else { 2.0 };
            prop_assert_eq!(c.close, want);
        }
    }
}

// ── 2. Order independence ────────────────────────────────────────────

proptest! {
    /// Disjoint fragments produce the same series in any arrival order.
    #[test]
    fn concat_of_disjoint_fragments_is_order_free(
        offsets in prop::collection::btree_set(0..5_000i64, 1..60),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..4),
        seed in any::<u64>(),
    ) {
        let offsets: Vec<i64> = offsets.into_iter().collect();
        let mut bounds: Vec<usize> = cuts.iter().map(|i| i.index(offsets.len())).collect();
        bounds.push(0);
        bounds.push(offsets.len());
        bounds.sort_unstable();
        bounds.dedup();

        let mut fragments: Vec<Series> = bounds
            .windows(2)
            .map(|w| series_from(&offsets[w[0]..w[1]], 1.0))
            .collect();
        let forward = Series::concat(Granularity::Intraday, &fragments);

        // Deterministic shuffle driven by the seed
        let len = fragments.len();
        for i in (1..len).rev() {
            let j = ((seed >> (i % 32)) as usize) % (i + 1);
            fragments.swap(i, j);
        }
        let shuffled = Series::concat(Granularity::Intraday, &fragments);

        prop_assert_eq!(forward, shuffled);
    }
}

// ── 3. Chunking ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn chunks_cover_window_exactly(span_days in 1..2_000i64, max_days in 1..400i64) {
        let start = base();
        let end = start + Duration::days(span_days);
        let window = FetchWindow::new(start, end, Interval::Minute15).unwrap();
        let chunks = window.chunks(Duration::days(max_days)).unwrap();

        let expected = (span_days + max_days - 1) / max_days;
        prop_assert_eq!(chunks.len() as i64, expected);
        prop_assert_eq!(chunks[0].start(), start);
        prop_assert_eq!(chunks[chunks.len() - 1].end(), end);
        for pair in chunks.windows(2) {
            prop_assert_eq!(pair[0].end(), pair[1].start());
        }
        for c in &chunks {
            prop_assert!(c.span() <= Duration::days(max_days));
            prop_assert_eq!(c.interval(), Interval::Minute15);
        }
    }

    /// Clipping a full series to each chunk and merging back loses nothing.
    #[test]
    fn clipped_chunk_fragments_reassemble(
        offsets in arb_offsets(),
        max_minutes in 1..2_000i64,
    ) {
        let full = series_from(&offsets, 3.0);
        let window = FetchWindow::new(base(), base() + Duration::minutes(5_000), Interval::Minute1).unwrap();
        let chunks = window.chunks(Duration::minutes(max_minutes)).unwrap();

        let fragments: Vec<Series> = chunks.iter().map(|c| full.clip(c.start(), c.end())).collect();
        let total: usize = fragments.iter().map(Series::len).sum();
        prop_assert_eq!(total, full.len());
        prop_assert_eq!(Series::concat(Granularity::Intraday, &fragments), full);
    }
}
