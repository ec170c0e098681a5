//! Incremental-mode scenario tests against a scripted store.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use beacon_core::batch::{format_sql_datetime, parse_sql_datetime};
use beacon_core::Result;
use beacon_etl::exprs::{build_expr_map, ordered_selects};
use beacon_etl::response;
use beacon_etl::watermark::{incremental_window, WatermarkStore};
use beacon_etl::SYNC_COLUMN;

use beacon_clickhouse::Store;
use integration_tests::mocks::MockStore;

const SINK: &str = "response_analytics_acme_q3";
const WATERMARKS: &str = "etl_watermarks";

/// The orchestrator's incremental unit: probe, transform, then record the
/// new boundary. Failure anywhere leaves the watermark untouched.
async fn run_incremental_unit(
    store: &MockStore,
    watermark: &WatermarkStore<'_, MockStore>,
    sql: &str,
    to: DateTime<Utc>,
) -> Result<()> {
    store.health_check().await?;
    store.command(sql, "incremental-load").await?;
    watermark.record(SINK, to).await
}

fn incremental_sql(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    let map = build_expr_map(&[], &[]);
    let live: Vec<String> = [
        "participantListId",
        "participantListMemberId",
        "participantId",
        "responseId",
        SYNC_COLUMN,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    let (columns, selects) = ordered_selects(&live, &map);
    response::incremental_insert(SINK, Uuid::nil(), from, to, &columns, &selects)
}

#[tokio::test]
async fn test_overlap_widens_the_scan_window() {
    let last = parse_sql_datetime("2024-02-01 00:00:00").unwrap();
    let now = parse_sql_datetime("2024-02-01 06:00:00").unwrap();

    let (from, to) = incremental_window(last, now, chrono::Duration::minutes(45));
    assert_eq!(format_sql_datetime(from), "2024-01-31 23:15:00");
    assert_eq!(to, now);

    let sql = incremental_sql(from, to);
    assert!(sql.contains("BETWEEN parseDateTimeBestEffort('2024-01-31 23:15:00')"));
    assert!(sql.contains("parseDateTimeBestEffort('2024-02-01 06:00:00')"));
}

#[tokio::test]
async fn test_mode_decision_reads_latest_watermark() {
    let store = MockStore::new();
    let watermark = WatermarkStore::new(&store, WATERMARKS);

    // No watermark row: first-load mode.
    store.set_scalar(None);
    assert!(watermark.last_applied(SINK).await.unwrap().is_none());

    // A recorded boundary selects incremental mode.
    store.set_scalar(Some("2024-02-01 00:00:00"));
    let last = watermark.last_applied(SINK).await.unwrap().unwrap();
    assert_eq!(format_sql_datetime(last), "2024-02-01 00:00:00");
}

#[tokio::test]
async fn test_successful_pass_advances_watermark_to_now() {
    let store = MockStore::new();
    let watermark = WatermarkStore::new(&store, WATERMARKS);

    let last = parse_sql_datetime("2024-02-01 00:00:00").unwrap();
    let now = parse_sql_datetime("2024-02-01 06:00:00").unwrap();
    let (from, to) = incremental_window(last, now, chrono::Duration::minutes(45));

    let sql = incremental_sql(from, to);
    run_incremental_unit(&store, &watermark, &sql, to)
        .await
        .unwrap();

    let commands = store.commands();
    // Transform first, watermark append second.
    assert_eq!(commands.len(), 2);
    assert!(commands[0].starts_with("INSERT INTO \"response_analytics_acme_q3\""));
    assert!(commands[1].contains(WATERMARKS));
    assert!(commands[1].contains("2024-02-01 06:00:00"));
}

#[tokio::test]
async fn test_failed_pass_is_fatal_and_leaves_watermark_untouched() {
    let store = MockStore::new();
    let watermark = WatermarkStore::new(&store, WATERMARKS);

    let from = parse_sql_datetime("2024-01-31 23:15:00").unwrap();
    let to = parse_sql_datetime("2024-02-01 06:00:00").unwrap();
    let sql = incremental_sql(from, to);

    store.fail_statements_containing("changed_scope");
    let result = run_incremental_unit(&store, &watermark, &sql, to).await;

    assert!(result.is_err());
    assert!(store.commands_containing(WATERMARKS).is_empty());
}

#[tokio::test]
async fn test_watermark_table_ddl_is_idempotent() {
    let store = MockStore::new();
    let watermark = WatermarkStore::new(&store, WATERMARKS);

    watermark.ensure_table().await.unwrap();
    let commands = store.commands();
    assert_eq!(commands.len(), 1);
    assert!(commands[0].starts_with("CREATE TABLE IF NOT EXISTS \"etl_watermarks\""));
}
