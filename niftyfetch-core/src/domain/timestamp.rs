//! Lenient timestamp parsing for provider payloads and persisted files.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%:z",
    "%Y-%m-%dT%H:%M:%S%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
];

/// Parse a date or date-time.
///
/// Accepts plain dates, space- or `T`-separated date-times with optional
/// fractional seconds, and offset-suffixed forms such as
/// `2023-01-02 09:15:00+05:30`. Offsets are dropped and the wall-clock time
/// kept, since every series is stored in exchange-local time.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.naive_local());
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(Default::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn parses_all_supported_forms() {
        assert_eq!(parse_timestamp("2023-01-02"), Some(dt(2023, 1, 2, 0, 0)));
        assert_eq!(parse_timestamp("2023-01-02 09:15:00"), Some(dt(2023, 1, 2, 9, 15)));
        assert_eq!(parse_timestamp("2023-01-02T09:15:00"), Some(dt(2023, 1, 2, 9, 15)));
        assert_eq!(parse_timestamp("2023-01-02T09:15:00.000"), Some(dt(2023, 1, 2, 9, 15)));
        assert_eq!(
            parse_timestamp("2023-01-02 09:15:00+05:30"),
            Some(dt(2023, 1, 2, 9, 15))
        );
    }

    #[test]
    fn parses_fractional_seconds_with_offset() {
        assert_eq!(
            parse_timestamp("2023-01-02 09:15:00.000+05:30"),
            Some(dt(2023, 1, 2, 9, 15))
        );
        assert_eq!(
            parse_timestamp("2023-01-02T09:15:00.250+05:30").map(|t| t.and_utc().timestamp()),
            Some(dt(2023, 1, 2, 9, 15).and_utc().timestamp())
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
