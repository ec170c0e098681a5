//! Watermark persistence: the last source-time boundary durably applied to
//! each sink table.
//!
//! The metadata table is append-only; the latest row per sink table wins.
//! A boundary is recorded only after its unit of work has landed, so the
//! recorded sequence is a (possibly sparse) increasing subsequence of the
//! attempted one.

use chrono::{DateTime, Duration, Utc};

use beacon_clickhouse::Store;
use beacon_core::batch::{format_sql_datetime, parse_sql_datetime};
use beacon_core::ident::{quote_ident, quote_str};
use beacon_core::Result;

/// Watermark bookkeeping against the metadata table.
pub struct WatermarkStore<'a, S: Store + ?Sized> {
    store: &'a S,
    table: String,
}

impl<'a, S: Store + ?Sized> WatermarkStore<'a, S> {
    pub fn new(store: &'a S, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    /// Idempotent DDL for the metadata table.
    pub async fn ensure_table(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {}\n\
             (\n    \
                 table_name String,\n    \
                 last_run DateTime\n\
             )\n\
             ENGINE = MergeTree()\n\
             ORDER BY (table_name, last_run)",
            quote_ident(&self.table)
        );
        self.store.command(&sql, "ensure-watermark-table").await
    }

    /// Latest recorded boundary for a sink table, if any. Read once per run
    /// to pick first-load vs incremental mode.
    pub async fn last_applied(&self, sink_table: &str) -> Result<Option<DateTime<Utc>>> {
        let sql = format!(
            "SELECT toString(last_run) FROM {} \
             WHERE table_name = {} \
             ORDER BY last_run DESC \
             LIMIT 1",
            quote_ident(&self.table),
            quote_str(sink_table)
        );
        match self.store.fetch_scalar(&sql, "read-watermark").await? {
            Some(ts) => parse_sql_datetime(&ts).map(Some),
            None => Ok(None),
        }
    }

    /// Appends a new boundary after a unit of work has been durably applied.
    pub async fn record(&self, sink_table: &str, boundary: DateTime<Utc>) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (table_name, last_run) VALUES ({}, parseDateTimeBestEffort({}))",
            quote_ident(&self.table),
            quote_str(sink_table),
            quote_str(&format_sql_datetime(boundary))
        );
        self.store.command(&sql, "record-watermark").await
    }
}

/// Widens the incremental scan to `[last - overlap, now)`.
///
/// Change detection keys off each source relation's own sync timestamp, so a
/// write that landed just before the previous boundary but was not yet
/// visible then would otherwise be missed. Re-scanning the trailing overlap
/// is safe because the sink's merge engine deduplicates re-written rows.
pub fn incremental_window(
    last: DateTime<Utc>,
    now: DateTime<Utc>,
    overlap: Duration,
) -> (DateTime<Utc>, DateTime<Utc>) {
    (last - overlap, now)
}
