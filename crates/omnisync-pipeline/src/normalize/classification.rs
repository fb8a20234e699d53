//! Static column-name → type rules

use crate::table::ColumnType;
use omnisync_common::CommonError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Column names typed as integers unless configured otherwise.
pub const DEFAULT_INTEGER_COLUMNS: &[&str] = &[
    "id",
    "deal_no",
    "requester_id",
    "lead_id",
    "customer_id",
    "user_id",
    "count",
    "so_luong",
    "amount",
    "qty",
    "is_active",
    "is_overdue",
];

/// Column names typed as timestamps unless configured otherwise.
pub const DEFAULT_TIMESTAMP_COLUMNS: &[&str] = &[
    "created_at",
    "updated_at",
    "created_time",
    "updated_time",
    "start_date",
    "end_date",
    "date",
    "timestamp",
    "closed_at",
];

/// Lower-cased column name → [`ColumnType`]; unknown names are text.
///
/// Resolved once per column before any cell is looked at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnClassification {
    rules: HashMap<String, ColumnType>,
}

impl Default for ColumnClassification {
    fn default() -> Self {
        let rules = DEFAULT_INTEGER_COLUMNS
            .iter()
            .map(|name| (name.to_string(), ColumnType::Integer))
            .chain(
                DEFAULT_TIMESTAMP_COLUMNS
                    .iter()
                    .map(|name| (name.to_string(), ColumnType::Timestamp)),
            )
            .collect();
        Self { rules }
    }
}

impl ColumnClassification {
    /// No rules: every column is text
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    pub fn with_integer(self, name: &str) -> Self {
        self.with_rule(name, ColumnType::Integer)
    }

    pub fn with_timestamp(self, name: &str) -> Self {
        self.with_rule(name, ColumnType::Timestamp)
    }

    pub fn with_text(self, name: &str) -> Self {
        self.with_rule(name, ColumnType::Text)
    }

    fn with_rule(mut self, name: &str, column_type: ColumnType) -> Self {
        self.rules.insert(name.to_lowercase(), column_type);
        self
    }

    pub fn classify(&self, column: &str) -> ColumnType {
        self.rules
            .get(&column.to_lowercase())
            .copied()
            .unwrap_or(ColumnType::Text)
    }
}

/// How a missing value in a text column is written
///
/// `LiteralNone` reproduces the long-standing behaviour of emitting the text
/// `"None"`; downstream reports may already filter on it, so it stays the
/// default until confirmed otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextNullPolicy {
    #[default]
    LiteralNone,
    Empty,
}

impl TextNullPolicy {
    pub fn render(self) -> &'static str {
        match self {
            TextNullPolicy::LiteralNone => "None",
            TextNullPolicy::Empty => "",
        }
    }
}

impl std::str::FromStr for TextNullPolicy {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "literal_none" => Ok(TextNullPolicy::LiteralNone),
            "empty" | "" => Ok(TextNullPolicy::Empty),
            other => Err(CommonError::config(format!(
                "Invalid text null policy '{other}', expected 'none' or 'empty'"
            ))),
        }
    }
}
