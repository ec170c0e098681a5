//! Time-window planning for backfill runs.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use crate::error::{Error, Result};

/// One half-open backfill window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Splits `[range_start, range_end)` into contiguous, non-overlapping windows
/// of `width`, the final window clipped to `range_end`.
///
/// Returns an empty plan (not an error) when the range is empty or inverted.
pub fn plan_windows(
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
    width: Duration,
) -> Vec<BatchWindow> {
    let mut windows = Vec::new();
    if width <= Duration::zero() {
        return windows;
    }

    let mut start = range_start;
    while start < range_end {
        let end = std::cmp::min(start + width, range_end);
        windows.push(BatchWindow { start, end });
        start = end;
    }
    windows
}

/// Renders a timestamp the way generated SQL expects it: `YYYY-MM-DD HH:MM:SS`.
///
/// ClickHouse `DateTime` values are timezone-less; the engine works in UTC
/// throughout and always parses these back with `parseDateTimeBestEffort`.
pub fn format_sql_datetime(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Parses a timestamp string read back from the store.
pub fn parse_sql_datetime(s: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::parse(format!("bad timestamp {:?}: {}", s, e)))
}
