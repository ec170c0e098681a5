//! Backfill scenario tests against a scripted store.

use std::time::Duration;

use uuid::Uuid;

use beacon_core::batch::{parse_sql_datetime, plan_windows};
use beacon_etl::backfill::{execute_batches, Batch};
use beacon_etl::exprs::{build_expr_map, ordered_selects};
use beacon_etl::response;
use beacon_etl::watermark::WatermarkStore;
use beacon_etl::SYNC_COLUMN;

use integration_tests::mocks::MockStore;

const SINK: &str = "response_analytics_acme_q3";
const WATERMARKS: &str = "etl_watermarks";

fn plan_batches(range_start: &str, range_end: &str, window_days: i64) -> Vec<Batch> {
    let start = parse_sql_datetime(range_start).unwrap();
    let end = parse_sql_datetime(range_end).unwrap();

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

    plan_windows(start, end, chrono::Duration::days(window_days))
        .iter()
        .map(|w| {
            Batch::new(
                *w,
                response::first_load_insert(SINK, Uuid::nil(), w, &columns, &selects),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_first_load_two_batches_advance_watermark_to_range_end() {
    let store = MockStore::new();
    let watermark = WatermarkStore::new(&store, WATERMARKS);

    let batches = plan_batches("2024-01-01 00:00:00", "2024-01-11 00:00:00", 5);
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1].end_marker, "2024-01-11 00:00:00");

    let report = execute_batches(
        &store,
        &watermark,
        SINK,
        &batches,
        2,
        Duration::from_millis(1),
    )
    .await;

    assert_eq!(report.applied, 2);
    assert_eq!(report.failed, 0);

    let watermark_writes = store.commands_containing(WATERMARKS);
    assert_eq!(watermark_writes.len(), 2);
    // The final recorded boundary is the range end.
    assert!(watermark_writes
        .iter()
        .any(|sql| sql.contains("2024-01-11 00:00:00")));
}

#[tokio::test]
async fn test_failed_batch_is_isolated_and_leaves_no_watermark() {
    let store = MockStore::new();
    let watermark = WatermarkStore::new(&store, WATERMARKS);

    let batches = plan_batches("2024-01-01 00:00:00", "2024-01-11 00:00:00", 5);

    // The first window's transform carries its start bound; poisoning it
    // simulates a transient failure that exhausted the client's retries.
    store.fail_statements_containing("2024-01-01 00:00:00");

    let report = execute_batches(
        &store,
        &watermark,
        SINK,
        &batches,
        2,
        Duration::from_millis(1),
    )
    .await;

    // The run settles instead of raising; the sibling batch still lands.
    assert_eq!(report.applied, 1);
    assert_eq!(report.failed, 1);

    let watermark_writes = store.commands_containing(WATERMARKS);
    assert_eq!(watermark_writes.len(), 1);
    assert!(watermark_writes[0].contains("2024-01-11 00:00:00"));
    // The failed window's boundary was never recorded.
    assert!(!watermark_writes[0].contains("2024-01-06 00:00:00"));
}

#[tokio::test]
async fn test_attempted_watermarks_increase_across_groups() {
    let store = MockStore::new();
    let watermark = WatermarkStore::new(&store, WATERMARKS);

    let batches = plan_batches("2024-01-01 00:00:00", "2024-01-31 00:00:00", 10);
    assert_eq!(batches.len(), 3);

    execute_batches(
        &store,
        &watermark,
        SINK,
        &batches,
        1,
        Duration::from_millis(1),
    )
    .await;

    // With groups of one, the recorded boundaries appear strictly in time
    // order; larger groups only reorder within a group.
    let boundaries: Vec<String> = store
        .commands_containing(WATERMARKS)
        .iter()
        .filter_map(|sql| {
            sql.split("parseDateTimeBestEffort('")
                .nth(1)
                .map(|rest| rest[..19].to_string())
        })
        .collect();

    assert_eq!(
        boundaries,
        vec![
            "2024-01-11 00:00:00",
            "2024-01-21 00:00:00",
            "2024-01-31 00:00:00",
        ]
    );
}

#[tokio::test]
async fn test_unhealthy_store_fails_every_batch_without_watermarks() {
    let store = MockStore::new();
    let watermark = WatermarkStore::new(&store, WATERMARKS);

    let batches = plan_batches("2024-01-01 00:00:00", "2024-01-11 00:00:00", 5);
    store.set_unhealthy(true);

    let report = execute_batches(
        &store,
        &watermark,
        SINK,
        &batches,
        2,
        Duration::from_millis(1),
    )
    .await;

    assert_eq!(report.applied, 0);
    assert_eq!(report.failed, 2);
    assert!(store.commands_containing(WATERMARKS).is_empty());
}
