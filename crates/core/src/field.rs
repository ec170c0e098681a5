//! Tenant-defined dynamic fields.
//!
//! Questions and participant attributes are configured by tenants outside
//! this engine; here they are read-only inputs to schema migration and
//! expression building. Once a field has been observed, its sink column is
//! never dropped, only added or widened.

use serde::{Deserialize, Serialize};

/// One tenant-defined survey question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionField {
    /// Stable identifier; doubles as the sink column name.
    pub id: String,
    /// Declared answer kind from the question catalog.
    pub answer_kind: String,
    /// Whether answers are multi-valued.
    pub multi_select: bool,
}

impl QuestionField {
    /// Sink column type for this question.
    pub fn column_type(&self) -> &'static str {
        if self.multi_select {
            "Array(String)"
        } else {
            "String"
        }
    }
}

/// Dynamic fields discovered for one campaign.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DynamicFields {
    pub questions: Vec<QuestionField>,
    /// Free-form participant attribute names.
    pub attributes: Vec<String>,
}

impl DynamicFields {
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty() && self.attributes.is_empty()
    }
}

/// Normalizes the catalog's free-text multi-select indicator.
///
/// Anything other than `true`/`t`/`1`/`yes` (case-insensitive), including an
/// empty value, is false.
pub fn parse_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "t" | "1" | "yes"
    )
}
