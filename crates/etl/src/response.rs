//! Response-analytics materialization: query composition and the run
//! orchestrator for the response domain.
//!
//! The sink is one wide row per (list member, response), with the campaign's
//! dynamic question and attribute columns extracted from JSON answer blobs.

use chrono::{DateTime, Utc};
use clickhouse::Row;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use beacon_clickhouse::{ClickHouseClient, SessionSettings};
use beacon_core::batch::{format_sql_datetime, parse_sql_datetime, plan_windows, BatchWindow};
use beacon_core::ident::{quote_ident, quote_str};
use beacon_core::Result;

use crate::backfill::{execute_batches, Batch};
use crate::config::EtlConfig;
use crate::discovery;
use crate::exprs::{build_expr_map, ordered_selects};
use crate::migrate::{ensure_columns, plan_column_changes};
use crate::watermark::{incremental_window, WatermarkStore};
use crate::SYNC_COLUMN;

/// Table-name prefix for the response domain.
pub const TABLE_PREFIX: &str = "response_analytics_";

#[derive(Debug, Row, Deserialize)]
struct SourceRange {
    total: u64,
    min_ts: String,
    max_ts: String,
}

/// Idempotent DDL for a response-analytics sink table.
///
/// Only the identity spine and the version column are declared here; dynamic
/// columns are added by the migrator before any insert is generated.
pub fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table}\n\
         (\n    \
             participantListId UUID,\n    \
             participantListMemberId UUID,\n    \
             participantId UUID,\n    \
             responseId String,\n    \
             {sync} DateTime\n\
         )\n\
         ENGINE = ReplacingMergeTree({sync})\n\
         PARTITION BY toYYYYMM({sync})\n\
         ORDER BY (participantListMemberId, responseId)",
        table = quote_ident(table),
        sync = SYNC_COLUMN,
    )
}

/// Backfill transform for one window: participants scoped by creation time,
/// joined to their memberships, lists, and responses.
pub fn first_load_insert(
    table: &str,
    campaign_id: Uuid,
    window: &BatchWindow,
    columns: &[String],
    selects: &[String],
) -> String {
    let campaign = quote_str(&campaign_id.to_string());
    let start = quote_str(&format_sql_datetime(window.start));
    let end = quote_str(&format_sql_datetime(window.end));

    let body = format!(
        "WITH campaign_participants AS (\n    \
             SELECT p.id AS participantId, p.fields, p.createdAt, p.{sync} AS participant_synced_at\n    \
             FROM Participants p\n    \
             INNER JOIN Campaigns c ON c.organizationId = p.organizationId\n    \
             WHERE c.id = {campaign}\n      \
               AND p.createdAt >= parseDateTimeBestEffort({start})\n      \
               AND p.createdAt <  parseDateTimeBestEffort({end})\n\
         ),\n\
         participant_members AS (\n    \
             SELECT id AS participantListMemberId, participantListId, participantId, prefilledData, {sync} AS plm_synced_at\n    \
             FROM ParticipantListMembers\n    \
             WHERE participantId IN (SELECT participantId FROM campaign_participants)\n\
         ),\n\
         participant_lists AS (\n    \
             SELECT id AS participantListId, listName, {sync} AS list_synced_at\n    \
             FROM ParticipantLists\n    \
             WHERE campaignId = {campaign}\n\
         ),\n\
         response_join AS (\n    \
             SELECT id AS responseId, participantListMemberId, answers, participantId, {sync} AS response_synced_at\n    \
             FROM Responses\n\
         )\n\
         SELECT\n    {select_list}\n\
         FROM participant_members plm\n\
         INNER JOIN participant_lists pl ON pl.participantListId = plm.participantListId\n\
         INNER JOIN campaign_participants p ON p.participantId = plm.participantId\n\
         LEFT JOIN response_join rj ON rj.participantListMemberId = plm.participantListMemberId",
        sync = SYNC_COLUMN,
        campaign = campaign,
        start = start,
        end = end,
        select_list = selects.join(",\n    "),
    );

    insert_with_columns(table, columns, &body)
}

/// Incremental transform for `[from, to)`: a one-hop changed scope over the
/// source relations, then the same join pipeline restricted to that scope.
///
/// The scope unions the keys of every directly-changed relation with the
/// current members of changed lists, so a parent-only change (a list rename)
/// still refreshes all of its children. One hop only: a change does not
/// need to cascade further for these sink tables.
pub fn incremental_insert(
    table: &str,
    campaign_id: Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    columns: &[String],
    selects: &[String],
) -> String {
    let campaign = quote_str(&campaign_id.to_string());
    let start = quote_str(&format_sql_datetime(from));
    let end = quote_str(&format_sql_datetime(to));

    let body = format!(
        "WITH changed_participants AS (\n    \
             SELECT DISTINCT p.id AS participantId\n    \
             FROM Participants p\n    \
             INNER JOIN Campaigns c ON c.organizationId = p.organizationId\n    \
             WHERE c.id = {campaign}\n      \
               AND p.{sync} BETWEEN parseDateTimeBestEffort({start}) AND parseDateTimeBestEffort({end})\n\
         ),\n\
         changed_members AS (\n    \
             SELECT DISTINCT plm.participantId, plm.participantListId\n    \
             FROM ParticipantListMembers plm\n    \
             INNER JOIN ParticipantLists pl ON pl.id = plm.participantListId\n    \
             WHERE plm.{sync} BETWEEN parseDateTimeBestEffort({start}) AND parseDateTimeBestEffort({end})\n      \
               AND pl.campaignId = {campaign}\n\
         ),\n\
         changed_lists AS (\n    \
             SELECT DISTINCT id AS participantListId\n    \
             FROM ParticipantLists\n    \
             WHERE campaignId = {campaign}\n      \
               AND {sync} BETWEEN parseDateTimeBestEffort({start}) AND parseDateTimeBestEffort({end})\n\
         ),\n\
         changed_responses AS (\n    \
             SELECT DISTINCT r.participantId\n    \
             FROM Responses r\n    \
             INNER JOIN Campaigns c ON c.id = r.campaignId\n    \
             WHERE c.id = {campaign}\n      \
               AND r.{sync} BETWEEN parseDateTimeBestEffort({start}) AND parseDateTimeBestEffort({end})\n\
         ),\n\
         changed_scope AS (\n    \
             SELECT participantId FROM changed_participants\n    \
             UNION ALL SELECT participantId FROM changed_members\n    \
             UNION ALL SELECT participantId FROM changed_responses\n    \
             UNION ALL\n    \
             SELECT participantId\n    \
             FROM ParticipantListMembers\n    \
             WHERE participantListId IN (SELECT participantListId FROM changed_lists)\n\
         ),\n\
         campaign_participants AS (\n    \
             SELECT p.id AS participantId, p.fields, p.{sync} AS participant_synced_at\n    \
             FROM Participants p\n    \
             WHERE p.id IN (SELECT participantId FROM changed_scope)\n\
         ),\n\
         participant_members AS (\n    \
             SELECT id AS participantListMemberId, participantListId, participantId, prefilledData, {sync} AS plm_synced_at\n    \
             FROM ParticipantListMembers\n    \
             WHERE participantId IN (SELECT participantId FROM changed_scope)\n\
         ),\n\
         participant_lists AS (\n    \
             SELECT id AS participantListId, listName, {sync} AS list_synced_at\n    \
             FROM ParticipantLists\n    \
             WHERE id IN (SELECT participantListId FROM participant_members)\n\
         ),\n\
         response_join AS (\n    \
             SELECT id AS responseId, participantListMemberId, answers, participantId, {sync} AS response_synced_at\n    \
             FROM Responses\n    \
             WHERE participantListMemberId IN (SELECT participantListMemberId FROM participant_members)\n\
         )\n\
         SELECT\n    {select_list}\n\
         FROM participant_members plm\n\
         INNER JOIN participant_lists pl ON pl.participantListId = plm.participantListId\n\
         INNER JOIN campaign_participants p ON p.participantId = plm.participantId\n\
         LEFT JOIN response_join rj ON rj.participantListMemberId = plm.participantListMemberId",
        sync = SYNC_COLUMN,
        campaign = campaign,
        start = start,
        end = end,
        select_list = selects.join(",\n    "),
    );

    insert_with_columns(table, columns, &body)
}

fn insert_with_columns(table: &str, columns: &[String], body: &str) -> String {
    let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    format!(
        "INSERT INTO {} ({})\n{}",
        quote_ident(table),
        column_list.join(", "),
        body
    )
}

/// Runs the response-analytics materialization for one campaign.
pub struct ResponseAnalyticsEtl<'a> {
    client: &'a ClickHouseClient,
    config: EtlConfig,
    settings: SessionSettings,
}

impl<'a> ResponseAnalyticsEtl<'a> {
    pub fn new(client: &'a ClickHouseClient, config: EtlConfig, settings: SessionSettings) -> Self {
        Self {
            client,
            config,
            settings,
        }
    }

    /// One full run: probe, session settings, schema, watermark decision,
    /// then first load or incremental. Safe to re-invoke for the same
    /// campaign; re-running converges the sink table via the merge engine.
    pub async fn run(&self, campaign_id: Uuid) -> Result<()> {
        let started = std::time::Instant::now();

        let basename = discovery::sink_table_basename(self.client, campaign_id).await?;
        let sink_table = format!("{}{}", TABLE_PREFIX, basename);
        info!(campaign = %campaign_id, table = %sink_table, "starting response-analytics run");

        // A dead store fails the run before any work is attempted.
        self.client.health_check().await?;
        self.client
            .command(&self.settings.to_sql(), "apply-settings")
            .await?;

        if !discovery::table_exists(self.client, &sink_table).await? {
            info!(table = %sink_table, "creating missing sink table");
        }
        self.client
            .command(&create_table_sql(&sink_table), "create-table")
            .await?;

        let watermark = WatermarkStore::new(self.client, self.config.watermark_table.clone());
        watermark.ensure_table().await?;

        let fields = discovery::dynamic_fields(self.client, campaign_id).await?;
        let observed = discovery::sink_columns(self.client, &sink_table).await?;
        let changes = plan_column_changes(&observed, &fields);
        ensure_columns(self.client, &sink_table, &changes).await?;

        // The live physical order drives the generated column list. Re-read
        // only when the migrator actually changed something.
        let live: Vec<String> = if changes.is_empty() {
            observed.into_iter().map(|c| c.name).collect()
        } else {
            discovery::sink_columns(self.client, &sink_table)
                .await?
                .into_iter()
                .map(|c| c.name)
                .collect()
        };

        let exprs = build_expr_map(&fields.questions, &fields.attributes);
        let (columns, selects) = ordered_selects(&live, &exprs);

        match watermark.last_applied(&sink_table).await? {
            None => {
                self.first_load(campaign_id, &sink_table, &columns, &selects, &watermark)
                    .await?
            }
            Some(last) => {
                self.incremental(campaign_id, &sink_table, &columns, &selects, &watermark, last)
                    .await?
            }
        }

        info!(
            campaign = %campaign_id,
            table = %sink_table,
            elapsed_s = format!("{:.2}", started.elapsed().as_secs_f64()),
            "response-analytics run complete"
        );
        Ok(())
    }

    async fn first_load(
        &self,
        campaign_id: Uuid,
        sink_table: &str,
        columns: &[String],
        selects: &[String],
        watermark: &WatermarkStore<'_, ClickHouseClient>,
    ) -> Result<()> {
        info!(table = sink_table, "no watermark found, performing first load");
        self.client.health_check().await?;

        let range_sql = format!(
            "SELECT count() AS total, \
                    toString(min(p.createdAt)) AS min_ts, \
                    toString(max(p.createdAt)) AS max_ts \
             FROM Participants p \
             INNER JOIN Campaigns c ON c.organizationId = p.organizationId \
             WHERE c.id = {}",
            quote_str(&campaign_id.to_string())
        );
        let range: SourceRange = self.client.fetch_one(&range_sql, "first-load-range").await?;

        if range.total == 0 {
            warn!(table = sink_table, "no source rows for first load");
            return Ok(());
        }

        let start = parse_sql_datetime(&range.min_ts)?;
        let end = parse_sql_datetime(&range.max_ts)?;
        let windows = plan_windows(start, end, self.config.batch_window());
        if windows.is_empty() {
            info!(table = sink_table, "source range is empty, nothing to backfill");
            return Ok(());
        }

        let batches: Vec<Batch> = windows
            .iter()
            .map(|w| {
                Batch::new(
                    *w,
                    first_load_insert(sink_table, campaign_id, w, columns, selects),
                )
            })
            .collect();

        info!(
            table = sink_table,
            batches = batches.len(),
            concurrency = self.config.concurrency,
            "planned backfill"
        );

        let report = execute_batches(
            self.client,
            watermark,
            sink_table,
            &batches,
            self.config.concurrency,
            self.config.batch_pause(),
        )
        .await;

        if report.failed > 0 {
            warn!(
                table = sink_table,
                applied = report.applied,
                failed = report.failed,
                "backfill finished with gaps"
            );
        } else {
            info!(table = sink_table, applied = report.applied, "backfill complete");
        }
        Ok(())
    }

    async fn incremental(
        &self,
        campaign_id: Uuid,
        sink_table: &str,
        columns: &[String],
        selects: &[String],
        watermark: &WatermarkStore<'_, ClickHouseClient>,
        last: DateTime<Utc>,
    ) -> Result<()> {
        info!(table = sink_table, "performing incremental load");
        self.client.health_check().await?;

        let (from, to) = incremental_window(last, Utc::now(), self.config.overlap());
        let sql = incremental_insert(sink_table, campaign_id, from, to, columns, selects);

        self.client.command(&sql, "incremental-load").await?;
        watermark.record(sink_table, to).await?;

        info!(
            table = sink_table,
            from = %format_sql_datetime(from),
            to = %format_sql_datetime(to),
            "incremental load complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exprs::BASE_COLUMNS;

    fn columns_and_selects() -> (Vec<String>, Vec<String>) {
        let map = build_expr_map(&[], &[]);
        let live: Vec<String> = BASE_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain([SYNC_COLUMN.to_string()])
            .collect();
        ordered_selects(&live, &map)
    }

    fn window(start: &str, end: &str) -> BatchWindow {
        BatchWindow {
            start: parse_sql_datetime(start).unwrap(),
            end: parse_sql_datetime(end).unwrap(),
        }
    }

    #[test]
    fn test_create_table_sql_shape() {
        let sql = create_table_sql("response_analytics_acme_q3");
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"response_analytics_acme_q3\""));
        assert!(sql.contains("ENGINE = ReplacingMergeTree(_synced_at)"));
        assert!(sql.contains("ORDER BY (participantListMemberId, responseId)"));
    }

    #[test]
    fn test_first_load_insert_scopes_by_creation_time() {
        let (columns, selects) = columns_and_selects();
        let w = window("2024-01-01 00:00:00", "2024-01-06 00:00:00");
        let id = Uuid::nil();

        let sql = first_load_insert("sink", id, &w, &columns, &selects);
        assert!(sql.starts_with("INSERT INTO \"sink\" (\"participantListId\""));
        assert!(sql.contains("p.createdAt >= parseDateTimeBestEffort('2024-01-01 00:00:00')"));
        assert!(sql.contains("p.createdAt <  parseDateTimeBestEffort('2024-01-06 00:00:00')"));
        // Backfill scopes by creation time, never by sync time.
        assert!(!sql.contains("BETWEEN"));
    }

    #[test]
    fn test_incremental_insert_builds_one_hop_changed_scope() {
        let (columns, selects) = columns_and_selects();
        let id = Uuid::nil();
        let from = parse_sql_datetime("2024-01-31 23:15:00").unwrap();
        let to = parse_sql_datetime("2024-02-01 06:00:00").unwrap();

        let sql = incremental_insert("sink", id, from, to, &columns, &selects);
        for cte in [
            "changed_participants",
            "changed_members",
            "changed_lists",
            "changed_responses",
            "changed_scope",
        ] {
            assert!(sql.contains(cte), "missing CTE {}", cte);
        }
        // Members of changed lists join the scope even when untouched
        // themselves; the union stays single-hop.
        assert!(sql.contains(
            "WHERE participantListId IN (SELECT participantListId FROM changed_lists)"
        ));
        assert!(sql.contains(
            "_synced_at BETWEEN parseDateTimeBestEffort('2024-01-31 23:15:00') AND parseDateTimeBestEffort('2024-02-01 06:00:00')"
        ));
    }

    #[test]
    fn test_insert_column_list_matches_live_order() {
        let map = build_expr_map(&[], &[]);
        let live: Vec<String> = ["participantListId", "q_b", "q_d", SYNC_COLUMN]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (columns, selects) = ordered_selects(&live, &map);
        let w = window("2024-01-01 00:00:00", "2024-01-02 00:00:00");

        let sql = first_load_insert("sink", Uuid::nil(), &w, &columns, &selects);
        let b = sql.find("\"q_b\"").unwrap();
        let d = sql.find("\"q_d\"").unwrap();
        assert!(b < d, "live order must be preserved in the column list");
    }
}
