//! Additive sink-column migration.
//!
//! The dynamic column set only ever grows: missing columns are added, type
//! drift is corrected in place, nothing is dropped. The diff is a pure
//! function so re-running with identical inputs plans nothing.

use std::collections::HashMap;

use tracing::info;

use beacon_clickhouse::ClickHouseClient;
use beacon_core::ident::quote_ident;
use beacon_core::{DynamicFields, Result};

use crate::discovery::SinkColumn;

/// One additive change against the live sink table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnChange {
    Add { name: String, data_type: &'static str },
    Modify { name: String, data_type: &'static str },
}

impl ColumnChange {
    fn to_clause(&self) -> String {
        match self {
            Self::Add { name, data_type } => {
                format!("ADD COLUMN IF NOT EXISTS {} {}", quote_ident(name), data_type)
            }
            Self::Modify { name, data_type } => {
                format!("MODIFY COLUMN IF EXISTS {} {}", quote_ident(name), data_type)
            }
        }
    }
}

/// Diffs desired dynamic fields against the observed columns.
///
/// Question fields get `Array(String)` when multi-select and `String`
/// otherwise; a present column with a different type is widened in place.
/// Attribute fields are scalar text and only ever added.
pub fn plan_column_changes(observed: &[SinkColumn], fields: &DynamicFields) -> Vec<ColumnChange> {
    let observed_types: HashMap<&str, &str> = observed
        .iter()
        .map(|c| (c.name.as_str(), c.data_type.as_str()))
        .collect();

    let mut changes = Vec::new();

    for question in &fields.questions {
        let desired = question.column_type();
        match observed_types.get(question.id.as_str()) {
            None => changes.push(ColumnChange::Add {
                name: question.id.clone(),
                data_type: desired,
            }),
            Some(current) if *current != desired => changes.push(ColumnChange::Modify {
                name: question.id.clone(),
                data_type: desired,
            }),
            Some(_) => {}
        }
    }

    for attribute in &fields.attributes {
        if !observed_types.contains_key(attribute.as_str()) {
            changes.push(ColumnChange::Add {
                name: attribute.clone(),
                data_type: "String",
            });
        }
    }

    changes
}

/// Applies a planned diff as a single `ALTER TABLE`.
///
/// An empty diff makes zero store round-trips.
pub async fn ensure_columns(
    client: &ClickHouseClient,
    table: &str,
    changes: &[ColumnChange],
) -> Result<()> {
    if changes.is_empty() {
        return Ok(());
    }

    let clauses: Vec<String> = changes.iter().map(ColumnChange::to_clause).collect();
    let sql = format!("ALTER TABLE {} {}", quote_ident(table), clauses.join(",\n    "));

    info!(table, changes = changes.len(), "ensuring dynamic columns");
    client.command(&sql, "ensure-columns").await
}
