//! Grouped, failure-isolated execution of backfill batches.

use std::time::Duration;

use futures::future::join_all;
use tracing::{error, info};

use beacon_clickhouse::Store;
use beacon_core::batch::{format_sql_datetime, BatchWindow};
use beacon_core::Result;

use crate::watermark::WatermarkStore;

/// One planned unit of backfill work.
#[derive(Debug, Clone)]
pub struct Batch {
    pub window: BatchWindow,
    /// Generated `INSERT ... SELECT` transform for the window.
    pub statement: String,
    /// Human-readable watermark candidate recorded when this batch lands.
    pub end_marker: String,
}

impl Batch {
    pub fn new(window: BatchWindow, statement: String) -> Self {
        Self {
            window,
            statement,
            end_marker: format_sql_datetime(window.end),
        }
    }
}

/// What happened to a backfill run's batches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackfillReport {
    pub applied: usize,
    pub failed: usize,
}

/// Executes batches in groups of `concurrency`.
///
/// Batches within a group run concurrently; the next group is not dispatched
/// until every batch in the current one has settled, and groups follow time
/// order, so the sequence of watermark values attempted is strictly
/// increasing. A failed batch is logged and isolated: siblings and later
/// groups proceed, the failed window's watermark stays unset for this run,
/// and nothing retries it until a later run's overlap re-scan. A fixed pause
/// follows every batch to bound sustained load on the sink.
pub async fn execute_batches<S: Store + ?Sized>(
    store: &S,
    watermark: &WatermarkStore<'_, S>,
    sink_table: &str,
    batches: &[Batch],
    concurrency: usize,
    pause: Duration,
) -> BackfillReport {
    let mut report = BackfillReport::default();

    for group in batches.chunks(concurrency.max(1)) {
        let outcomes = join_all(group.iter().map(|batch| async move {
            let applied = apply_batch(store, watermark, sink_table, batch).await;
            tokio::time::sleep(pause).await;
            applied
        }))
        .await;

        for applied in outcomes {
            if applied {
                report.applied += 1;
            } else {
                report.failed += 1;
            }
        }
    }

    report
}

/// Runs one batch end to end: liveness re-probe, transform, watermark.
///
/// Returns whether the batch landed; failures never escape this boundary.
async fn apply_batch<S: Store + ?Sized>(
    store: &S,
    watermark: &WatermarkStore<'_, S>,
    sink_table: &str,
    batch: &Batch,
) -> bool {
    info!(table = sink_table, batch_end = %batch.end_marker, "running backfill batch");

    let result: Result<()> = async {
        store.health_check().await?;
        store.command(&batch.statement, "batch-insert").await?;
        watermark.record(sink_table, batch.window.end).await
    }
    .await;

    match result {
        Ok(()) => {
            info!(table = sink_table, batch_end = %batch.end_marker, "backfill batch applied");
            true
        }
        Err(e) => {
            error!(
                table = sink_table,
                batch_end = %batch.end_marker,
                error = %e,
                "backfill batch failed; window left for a later overlap re-scan"
            );
            false
        }
    }
}
