//! Source-side value expressions for the response-analytics select list.
//!
//! The generated SELECT must stay total over the live, possibly wider,
//! column order of the sink table: every column resolves to either its
//! extraction expression or a NULL default.

use std::collections::BTreeMap;

use beacon_core::ident::{quote_ident, quote_str};
use beacon_core::QuestionField;

use crate::{SYNC_COLUMN, SYNC_EPOCH};

/// Identity columns present in every response-analytics sink table, in
/// insert order. The sync column always trails; dynamic columns sit between.
pub const BASE_COLUMNS: &[&str] = &[
    "participantListId",
    "participantListMemberId",
    "participantId",
    "responseId",
];

/// Target column name to unaliased source expression.
pub type ExprMap = BTreeMap<String, String>;

/// Builds the expression map for one campaign's dynamic fields.
///
/// Multi-select questions extract a structured array, response value first
/// with a pre-filled fallback. Scalar questions take the first array element
/// the same way, then fall back to plain string extraction for answers that
/// predate array encoding. Attributes are plain string extractions from the
/// participant attribute blob.
pub fn build_expr_map(questions: &[QuestionField], attributes: &[String]) -> ExprMap {
    let mut map = ExprMap::new();

    map.insert("participantListId".into(), "plm.participantListId".into());
    map.insert(
        "participantListMemberId".into(),
        "plm.participantListMemberId".into(),
    );
    map.insert("participantId".into(), "plm.participantId".into());
    map.insert("responseId".into(), "toString(rj.responseId)".into());
    map.insert(SYNC_COLUMN.into(), sync_expr());

    for question in questions {
        let key = quote_str(&question.id);
        let expr = if question.multi_select {
            format!(
                "coalesce(\
                 JSONExtract(rj.answers, {key}, 'Array(String)'), \
                 JSONExtract(plm.prefilledData, {key}, 'Array(String)'))"
            )
        } else {
            format!(
                "coalesce(\
                 arrayElement(JSONExtract(rj.answers, {key}, 'Array(String)'), 1), \
                 arrayElement(JSONExtract(plm.prefilledData, {key}, 'Array(String)'), 1), \
                 JSONExtractString(rj.answers, {key}), \
                 JSONExtractString(plm.prefilledData, {key}))"
            )
        };
        map.insert(question.id.clone(), expr);
    }

    for attribute in attributes {
        map.insert(
            attribute.clone(),
            format!("JSONExtractString(p.fields, {})", quote_str(attribute)),
        );
    }

    map
}

/// Version column: the greatest sync timestamp of the contributing source
/// rows, each defaulted to the epoch sentinel when absent. Whatever source
/// row changed most recently drives the sink row's version.
fn sync_expr() -> String {
    format!(
        "greatest(\
         ifNull(plm.plm_synced_at, toDateTime('{e}')), \
         ifNull(pl.list_synced_at, toDateTime('{e}')), \
         ifNull(p.participant_synced_at, toDateTime('{e}')), \
         ifNull(rj.response_synced_at, toDateTime('{e}')))",
        e = SYNC_EPOCH
    )
}

/// Re-derives `[identity..., dynamic..., sync]` from the live column order
/// and renders one aliased select item per column.
///
/// Live order wins over discovery order; columns without an expression
/// default to NULL so the list stays aligned release-over-release.
pub fn ordered_selects(live_columns: &[String], map: &ExprMap) -> (Vec<String>, Vec<String>) {
    let dynamic = live_columns
        .iter()
        .filter(|c| !BASE_COLUMNS.contains(&c.as_str()) && c.as_str() != SYNC_COLUMN);

    let mut ordered: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
    ordered.extend(dynamic.cloned());
    ordered.push(SYNC_COLUMN.to_string());

    let selects = ordered
        .iter()
        .map(|column| match map.get(column) {
            Some(expr) => format!("{} AS {}", expr, quote_ident(column)),
            None => format!("NULL AS {}", quote_ident(column)),
        })
        .collect();

    (ordered, selects)
}
