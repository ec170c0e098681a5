//! Schema discovery: dynamic field catalogs, live sink column order, and
//! sink table naming.

use clickhouse::Row;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use beacon_clickhouse::ClickHouseClient;
use beacon_core::ident::{quote_str, sanitize};
use beacon_core::{parse_truthy, DynamicFields, Error, QuestionField, Result};

/// One sink column as observed in the live table, in physical order.
#[derive(Debug, Clone, Row, Deserialize)]
pub struct SinkColumn {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Row, Deserialize)]
struct QuestionRow {
    id: String,
    answer_kind: String,
    multi_select: String,
}

#[derive(Debug, Row, Deserialize)]
struct FieldRow {
    field_name: String,
}

#[derive(Debug, Row, Deserialize)]
struct NameRow {
    campaign: String,
    organization: String,
}

/// Reads the per-campaign question catalog and the per-organization
/// participant-field catalog. Blank attribute names are dropped.
pub async fn dynamic_fields(
    client: &ClickHouseClient,
    campaign_id: Uuid,
) -> Result<DynamicFields> {
    let campaign = quote_str(&campaign_id.to_string());

    let question_sql = format!(
        "SELECT toString(questionId) AS id, \
                toString(questionType) AS answer_kind, \
                toString(isMultiSelect) AS multi_select \
         FROM CampaignQuestions \
         WHERE campaignId = {campaign}"
    );
    let field_sql = format!(
        "SELECT fieldName AS field_name \
         FROM ParticipantFields \
         WHERE organizationId IN (SELECT organizationId FROM Campaigns WHERE id = {campaign})"
    );

    let (question_rows, field_rows) = tokio::try_join!(
        client.fetch_all::<QuestionRow>(&question_sql, "fetch-questions"),
        client.fetch_all::<FieldRow>(&field_sql, "fetch-participant-fields"),
    )?;

    let questions: Vec<QuestionField> = question_rows
        .into_iter()
        .map(|r| QuestionField {
            id: r.id,
            answer_kind: r.answer_kind,
            multi_select: parse_truthy(&r.multi_select),
        })
        .collect();

    let attributes: Vec<String> = field_rows
        .into_iter()
        .map(|r| r.field_name)
        .filter(|name| !name.trim().is_empty())
        .collect();

    info!(
        campaign = %campaign_id,
        questions = questions.len(),
        attributes = attributes.len(),
        "loaded dynamic fields"
    );

    Ok(DynamicFields {
        questions,
        attributes,
    })
}

/// Checks whether a table exists in the current database.
pub async fn table_exists(client: &ClickHouseClient, table: &str) -> Result<bool> {
    let sql = format!(
        "SELECT count() FROM system.tables \
         WHERE database = currentDatabase() AND name = {}",
        quote_str(table)
    );
    let count: u64 = client.fetch_one(&sql, "table-exists").await?;
    Ok(count > 0)
}

/// Reads the sink table's columns in physical order.
///
/// This order, not discovery order, is authoritative for every generated
/// column list: inserting into an evolved table must never misalign values.
pub async fn sink_columns(client: &ClickHouseClient, table: &str) -> Result<Vec<SinkColumn>> {
    let sql = format!(
        "SELECT name, type AS data_type FROM system.columns \
         WHERE database = currentDatabase() AND table = {} \
         ORDER BY position",
        quote_str(table)
    );
    client.fetch_all::<SinkColumn>(&sql, "sink-columns").await
}

/// Derives the sink-table basename from the campaign and organization
/// display names, sanitized into identifier fragments.
pub async fn sink_table_basename(client: &ClickHouseClient, campaign_id: Uuid) -> Result<String> {
    let sql = format!(
        "SELECT c.name AS campaign, o.name AS organization \
         FROM Campaigns c \
         INNER JOIN Organizations o ON o.id = c.organizationId \
         WHERE c.id = {} \
         LIMIT 1",
        quote_str(&campaign_id.to_string())
    );

    let row: NameRow = client
        .fetch_optional(&sql, "sink-table-basename")
        .await?
        .ok_or(Error::UnknownCampaign(campaign_id))?;

    let organization = sanitize(&row.organization);
    let campaign = sanitize(&row.campaign);
    info!(
        campaign_name = %campaign,
        organization = %organization,
        "resolved sink table basename"
    );
    Ok(format!("{}_{}", organization, campaign))
}
