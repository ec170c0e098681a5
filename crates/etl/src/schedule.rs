//! Schedule-analytics materialization: query composition and the run
//! orchestrator for the schedule domain.
//!
//! The sink is one row per (list member, schedule, template), correlating
//! distribution schedules with the latest delivery-log outcome and the
//! template's channel metadata. The schema is fixed; no dynamic columns.

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
use crate::watermark::{incremental_window, WatermarkStore};
use crate::{SYNC_COLUMN, SYNC_EPOCH};

/// Table-name prefix for the schedule domain.
pub const TABLE_PREFIX: &str = "schedule_analytics_";

/// Sink columns in insert order; must match `create_table_sql`.
pub const SCHEDULE_COLUMNS: &[&str] = &[
    "participantListMemberId",
    "participantListId",
    "participantId",
    "createdAt",
    "token",
    "visited",
    "scheduleId",
    "scheduleDateAndTime",
    "sentStatus",
    "sendTo",
    "provider",
    "isAutoReminder",
    "distributionTemplateId",
    "listName",
    "distributionId",
    "success",
    "triggeredAt",
    "providerId",
    "templateName",
    "distributionChannel",
    SYNC_COLUMN,
];

#[derive(Debug, Row, Deserialize)]
struct SourceRange {
    total: u64,
    min_ts: String,
    max_ts: String,
}

/// Idempotent DDL for a schedule-analytics sink table.
pub fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table}\n\
         (\n    \
             participantListMemberId UUID,\n    \
             participantListId UUID,\n    \
             participantId UUID,\n    \
             createdAt DateTime,\n    \
             token String,\n    \
             visited UInt8,\n    \
             scheduleId UUID,\n    \
             scheduleDateAndTime DateTime,\n    \
             sentStatus LowCardinality(String),\n    \
             sendTo LowCardinality(String),\n    \
             provider LowCardinality(String),\n    \
             isAutoReminder UInt8,\n    \
             distributionTemplateId String,\n    \
             listName LowCardinality(String),\n    \
             distributionId UUID,\n    \
             success UInt8,\n    \
             triggeredAt DateTime,\n    \
             providerId LowCardinality(String),\n    \
             templateName LowCardinality(String),\n    \
             distributionChannel LowCardinality(String),\n    \
             {sync} DateTime\n\
         )\n\
         ENGINE = ReplacingMergeTree({sync})\n\
         PARTITION BY toYYYYMM({sync})\n\
         ORDER BY (participantListMemberId, scheduleId)",
        table = quote_ident(table),
        sync = SYNC_COLUMN,
    )
}

/// The fixed select list: one item per sink column, aligned with
/// `SCHEDULE_COLUMNS`.
fn select_list() -> String {
    format!(
        "plm.participantListMemberId,\n    \
         plm.participantListId,\n    \
         plm.participantId,\n    \
         plm.createdAt,\n    \
         plm.token,\n    \
         plm.visited,\n    \
         sd.scheduleId,\n    \
         sd.scheduleDateAndTime,\n    \
         sd.sentStatus,\n    \
         sd.sendTo,\n    \
         dt.provider,\n    \
         sd.isAutoReminder,\n    \
         sd.distributionTemplateId,\n    \
         pl.listName,\n    \
         dl.distributionId,\n    \
         dl.success,\n    \
         ifNull(dl.triggeredAt, sd.scheduleDateAndTime) AS triggeredAt,\n    \
         dt.providerId,\n    \
         dt.templateName,\n    \
         dt.distributionChannel,\n    \
         greatest(\
         ifNull(plm.member_synced_at, toDateTime('{e}')), \
         ifNull(pl.list_synced_at, toDateTime('{e}')), \
         ifNull(sd.schedule_synced_at, toDateTime('{e}')), \
         ifNull(dl.log_synced_at, toDateTime('{e}')), \
         ifNull(dt.template_synced_at, toDateTime('{e}'))) AS {sync}",
        e = SYNC_EPOCH,
        sync = SYNC_COLUMN,
    )
}

/// Backfill transform for one window: lists scoped by creation time, each
/// schedule exploded over its template ids, latest delivery log per
/// (schedule, member, template) via last-writer-wins aggregation.
pub fn first_load_insert(table: &str, campaign_id: Uuid, window: &BatchWindow) -> String {
    let campaign = quote_str(&campaign_id.to_string());
    let start = quote_str(&format_sql_datetime(window.start));
    let end = quote_str(&format_sql_datetime(window.end));

    let body = format!(
        "WITH campaign_lists AS (\n    \
             SELECT id AS participantListId, listName, createdAt, {sync} AS list_synced_at\n    \
             FROM ParticipantLists\n    \
             WHERE campaignId = {campaign}\n      \
               AND createdAt >= parseDateTimeBestEffort({start})\n      \
               AND createdAt <  parseDateTimeBestEffort({end})\n\
         ),\n\
         campaign_members AS (\n    \
             SELECT id AS participantListMemberId, participantId, participantListId,\n           \
                    token, visited, createdAt, {sync} AS member_synced_at\n    \
             FROM ParticipantListMembers\n    \
             WHERE participantListId IN (SELECT participantListId FROM campaign_lists)\n\
         ),\n\
         campaign_schedules AS (\n    \
             SELECT id AS scheduleId, participantListId, scheduleDateAndTime, sentStatus,\n           \
                    sendTo, provider, isAutoReminder,\n           \
                    arrayJoin(arrayConcat([toString(templateId)],\n           \
                    splitByString(',', assumeNotNull(additionalTemplates)))) AS distributionTemplateId,\n           \
                    {sync} AS schedule_synced_at\n    \
             FROM Schedules\n    \
             WHERE campaignId = {campaign}\n      \
               AND participantListId IN (SELECT participantListId FROM campaign_lists)\n      \
               AND distributionTemplateId != ''\n\
         ),\n\
         schedule_members AS (\n    \
             SELECT sd.scheduleId, sd.participantListId, plm.participantListMemberId, sd.distributionTemplateId\n    \
             FROM campaign_schedules AS sd\n    \
             INNER JOIN campaign_members AS plm ON sd.participantListId = plm.participantListId\n\
         ),\n\
         filtered_logs AS (\n    \
             SELECT\n        \
                 dl.scheduleId,\n        \
                 dl.participantListMemberId,\n        \
                 ifNull(toString(dl.templateId), '') AS templateId,\n        \
                 argMax(dl.id, dl.triggeredAt) AS distributionId,\n        \
                 argMax(dl.success, dl.triggeredAt) AS success,\n        \
                 argMax(dl.triggeredAt, dl.{sync}) AS triggeredAt,\n        \
                 argMax(dl.{sync}, dl.triggeredAt) AS log_synced_at\n    \
             FROM DistributionLogs AS dl\n    \
             INNER JOIN schedule_members AS sm\n      \
                 ON dl.scheduleId = sm.scheduleId\n     \
                AND dl.participantListMemberId = sm.participantListMemberId\n     \
                AND ifNull(toString(dl.templateId), '') = ifNull(sm.distributionTemplateId, '')\n    \
             GROUP BY dl.scheduleId, dl.participantListMemberId, templateId\n\
         ),\n\
         campaign_templates AS (\n    \
             SELECT toString(id) AS id_str, provider, providerId, templateName,\n           \
                    distributionChannel, {sync} AS template_synced_at\n    \
             FROM DistributionTemplates\n    \
             WHERE campaignId = {campaign}\n      \
               AND toString(id) IN (SELECT DISTINCT distributionTemplateId FROM campaign_schedules)\n\
         )\n\
         SELECT\n    {select_list}\n\
         FROM campaign_members AS plm\n\
         INNER JOIN campaign_lists AS pl ON pl.participantListId = plm.participantListId\n\
         LEFT JOIN campaign_schedules AS sd ON pl.participantListId = sd.participantListId\n\
         LEFT JOIN filtered_logs AS dl ON (sd.scheduleId, plm.participantListMemberId, sd.distributionTemplateId)\n                                       \
             = (dl.scheduleId, dl.participantListMemberId, dl.templateId)\n\
         LEFT JOIN campaign_templates AS dt ON sd.distributionTemplateId = dt.id_str",
        sync = SYNC_COLUMN,
        campaign = campaign,
        start = start,
        end = end,
        select_list = select_list(),
    );

    insert_with_columns(table, &body)
}

/// Incremental transform for `[from, to)`: a one-hop changed scope over
/// lists, members, schedules, and logs, then the join pipeline restricted to
/// that scope. `filtered_logs` aggregates last-writer-wins per composite
/// key; `last_ts`/`last_logs` join back to keep only the single freshest
/// record per (schedule, member) when several template keys match.
pub fn incremental_insert(
    table: &str,
    campaign_id: Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> String {
    let campaign = quote_str(&campaign_id.to_string());
    let start = quote_str(&format_sql_datetime(from));
    let end = quote_str(&format_sql_datetime(to));

    let body = format!(
        "WITH changed_lists AS (\n    \
             SELECT DISTINCT id AS participantListId FROM ParticipantLists\n    \
             WHERE campaignId = {campaign}\n      \
               AND {sync} BETWEEN parseDateTimeBestEffort({start}) AND parseDateTimeBestEffort({end})\n\
         ),\n\
         changed_members AS (\n    \
             SELECT DISTINCT participantListId FROM ParticipantListMembers\n    \
             WHERE {sync} BETWEEN parseDateTimeBestEffort({start}) AND parseDateTimeBestEffort({end})\n\
         ),\n\
         changed_schedules AS (\n    \
             SELECT DISTINCT participantListId, id AS scheduleId FROM Schedules\n    \
             WHERE campaignId = {campaign}\n      \
               AND {sync} BETWEEN parseDateTimeBestEffort({start}) AND parseDateTimeBestEffort({end})\n\
         ),\n\
         changed_logs AS (\n    \
             SELECT DISTINCT scheduleId, participantListMemberId FROM DistributionLogs\n    \
             INNER JOIN Schedules ON Schedules.id = DistributionLogs.scheduleId\n    \
             WHERE campaignId = {campaign}\n      \
               AND DistributionLogs.{sync} BETWEEN parseDateTimeBestEffort({start}) AND parseDateTimeBestEffort({end})\n\
         ),\n\
         changed_scope AS (\n    \
             SELECT DISTINCT participantListId FROM changed_lists\n    \
             UNION ALL SELECT DISTINCT participantListId FROM changed_members\n    \
             UNION ALL SELECT DISTINCT participantListId FROM changed_schedules\n    \
             UNION ALL SELECT DISTINCT s.participantListId FROM Schedules AS s\n      \
                 INNER JOIN changed_logs AS cl ON s.id = cl.scheduleId\n\
         ),\n\
         campaign_lists AS (\n    \
             SELECT id AS participantListId, listName, {sync} AS list_synced_at\n    \
             FROM ParticipantLists\n    \
             WHERE campaignId = {campaign}\n      \
               AND id IN (SELECT participantListId FROM changed_scope)\n\
         ),\n\
         campaign_members AS (\n    \
             SELECT id AS participantListMemberId, participantId, participantListId,\n           \
                    token, visited, createdAt, {sync} AS member_synced_at\n    \
             FROM ParticipantListMembers\n    \
             WHERE participantListId IN (SELECT participantListId FROM campaign_lists)\n\
         ),\n\
         campaign_schedules AS (\n    \
             SELECT id AS scheduleId, participantListId, scheduleDateAndTime, sentStatus,\n           \
                    sendTo, provider, isAutoReminder,\n           \
                    arrayJoin(arrayConcat([toString(templateId)],\n           \
                    splitByString(',', assumeNotNull(additionalTemplates)))) AS distributionTemplateId,\n           \
                    {sync} AS schedule_synced_at\n    \
             FROM Schedules\n    \
             WHERE campaignId = {campaign}\n      \
               AND participantListId IN (SELECT participantListId FROM campaign_lists)\n      \
               AND distributionTemplateId != ''\n\
         ),\n\
         filtered_logs AS (\n    \
             SELECT\n        \
                 dl.scheduleId,\n        \
                 dl.participantListMemberId,\n        \
                 ifNull(toString(dl.templateId), '') AS templateId,\n        \
                 argMax(dl.id, dl.triggeredAt) AS distributionId,\n        \
                 argMax(dl.success, dl.triggeredAt) AS success,\n        \
                 argMax(dl.triggeredAt, dl.{sync}) AS triggeredAt,\n        \
                 argMax(dl.{sync}, dl.triggeredAt) AS log_synced_at\n    \
             FROM DistributionLogs AS dl\n    \
             WHERE scheduleId IN (SELECT scheduleId FROM campaign_schedules)\n       \
                OR participantListMemberId IN (SELECT participantListMemberId FROM campaign_members)\n    \
             GROUP BY dl.scheduleId, dl.participantListMemberId, templateId\n\
         ),\n\
         last_ts AS (\n    \
             SELECT scheduleId, participantListMemberId, max(triggeredAt) AS triggeredAt\n    \
             FROM filtered_logs GROUP BY scheduleId, participantListMemberId\n\
         ),\n\
         last_logs AS (\n    \
             SELECT fl.scheduleId, fl.participantListMemberId, fl.success, fl.triggeredAt,\n           \
                    fl.log_synced_at, fl.distributionId\n    \
             FROM filtered_logs fl\n    \
             INNER JOIN last_ts t\n      \
                 ON fl.scheduleId = t.scheduleId AND fl.participantListMemberId = t.participantListMemberId\n     \
                AND fl.triggeredAt = t.triggeredAt\n\
         ),\n\
         campaign_templates AS (\n    \
             SELECT toString(id) AS id_str, provider, providerId, templateName,\n           \
                    distributionChannel, {sync} AS template_synced_at\n    \
             FROM DistributionTemplates\n    \
             WHERE campaignId = {campaign}\n      \
               AND ({sync} BETWEEN parseDateTimeBestEffort({start}) AND parseDateTimeBestEffort({end})\n        \
                 OR toString(id) IN (SELECT DISTINCT distributionTemplateId FROM campaign_schedules))\n\
         )\n\
         SELECT\n    {select_list}\n\
         FROM campaign_members AS plm\n\
         INNER JOIN campaign_lists AS pl ON pl.participantListId = plm.participantListId\n\
         LEFT JOIN campaign_schedules AS sd ON pl.participantListId = sd.participantListId\n\
         LEFT JOIN last_logs AS dl ON (sd.scheduleId, plm.participantListMemberId)\n                               \
             = (dl.scheduleId, dl.participantListMemberId)\n\
         LEFT JOIN campaign_templates AS dt ON sd.distributionTemplateId = dt.id_str",
        sync = SYNC_COLUMN,
        campaign = campaign,
        start = start,
        end = end,
        select_list = select_list(),
    );

    insert_with_columns(table, &body)
}

fn insert_with_columns(table: &str, body: &str) -> String {
    let column_list: Vec<String> = SCHEDULE_COLUMNS.iter().map(|c| quote_ident(c)).collect();
    format!(
        "INSERT INTO {} ({})\n{}",
        quote_ident(table),
        column_list.join(", "),
        body
    )
}

/// Runs the schedule-analytics materialization for one campaign.
pub struct ScheduleAnalyticsEtl<'a> {
    client: &'a ClickHouseClient,
    config: EtlConfig,
    settings: SessionSettings,
}

impl<'a> ScheduleAnalyticsEtl<'a> {
    pub fn new(client: &'a ClickHouseClient, config: EtlConfig, settings: SessionSettings) -> Self {
        Self {
            client,
            config,
            settings,
        }
    }

    /// One full run for the schedule domain. Same state machine as the
    /// response domain minus dynamic-schema discovery: the sink schema is
    /// fixed.
    pub async fn run(&self, campaign_id: Uuid) -> Result<()> {
        let started = std::time::Instant::now();

        let basename = discovery::sink_table_basename(self.client, campaign_id).await?;
        let sink_table = format!("{}{}", TABLE_PREFIX, basename);
        info!(campaign = %campaign_id, table = %sink_table, "starting schedule-analytics run");

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

        match watermark.last_applied(&sink_table).await? {
            None => self.first_load(campaign_id, &sink_table, &watermark).await?,
            Some(last) => {
                self.incremental(campaign_id, &sink_table, &watermark, last)
                    .await?
            }
        }

        info!(
            campaign = %campaign_id,
            table = %sink_table,
            elapsed_s = format!("{:.2}", started.elapsed().as_secs_f64()),
            "schedule-analytics run complete"
        );
        Ok(())
    }

    async fn first_load(
        &self,
        campaign_id: Uuid,
        sink_table: &str,
        watermark: &WatermarkStore<'_, ClickHouseClient>,
    ) -> Result<()> {
        info!(table = sink_table, "no watermark found, performing first load");
        self.client.health_check().await?;

        let range_sql = format!(
            "SELECT count() AS total, \
                    toString(min(createdAt)) AS min_ts, \
                    toString(max(createdAt)) AS max_ts \
             FROM ParticipantLists \
             WHERE campaignId = {}",
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
            .map(|w| Batch::new(*w, first_load_insert(sink_table, campaign_id, w)))
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
        watermark: &WatermarkStore<'_, ClickHouseClient>,
        last: DateTime<Utc>,
    ) -> Result<()> {
        info!(table = sink_table, "performing incremental load");
        self.client.health_check().await?;

        let (from, to) = incremental_window(last, Utc::now(), self.config.overlap());
        let sql = incremental_insert(sink_table, campaign_id, from, to);

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
