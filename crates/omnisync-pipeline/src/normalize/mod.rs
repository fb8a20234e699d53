//! Record normalization
//!
//! Turns loosely-typed API records into a [`Table`]:
//!
//! 1. the column set is the union of all record keys, in first-seen order;
//! 2. each column gets one [`ColumnType`] from the [`ColumnClassification`];
//! 3. cells are cast column by column, unparseable values become typed nulls;
//! 4. if a `created_at` column exists, rows are stably sorted by it.
//!
//! Normalization never fails. An integer column holding fractional numbers
//! cannot be represented and falls back to text with a [`ColumnDiagnostic`].

mod classification;

pub use classification::{
    ColumnClassification, TextNullPolicy, DEFAULT_INTEGER_COLUMNS, DEFAULT_TIMESTAMP_COLUMNS,
};

use crate::table::{Cell, Column, ColumnType, Table};
use omnisync_common::types::parse_datetime;
use omnisync_common::Record;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Column used to order the normalized table.
pub const SORT_COLUMN: &str = "created_at";

/// Number of rows logged at debug level after normalization.
const PREVIEW_ROWS: usize = 5;

/// A column that could not take its configured type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDiagnostic {
    pub column: String,
    pub requested: ColumnType,
    pub applied: ColumnType,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct NormalizedTable {
    pub table: Table,
    pub diagnostics: Vec<ColumnDiagnostic>,
}

/// Casts records to typed columns
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    classification: ColumnClassification,
    text_null: TextNullPolicy,
}

impl Normalizer {
    pub fn new(classification: ColumnClassification, text_null: TextNullPolicy) -> Self {
        Self {
            classification,
            text_null,
        }
    }

    pub fn normalize(&self, records: &[Record]) -> NormalizedTable {
        let names = collect_columns(records);
        let mut columns = Vec::with_capacity(names.len());
        let mut column_cells: Vec<Vec<Cell>> = Vec::with_capacity(names.len());
        let mut diagnostics = Vec::new();

        for name in names {
            let values: Vec<Option<&Value>> = records.iter().map(|r| r.get(&name)).collect();
            let requested = self.classification.classify(&name);

            let (column_type, cells) = match requested {
                ColumnType::Integer => match cast_integers(&values) {
                    Ok(cells) => (ColumnType::Integer, cells),
                    Err(reason) => {
                        warn!(column = %name, %reason, "Integer cast failed, keeping column as text");
                        diagnostics.push(ColumnDiagnostic {
                            column: name.clone(),
                            requested,
                            applied: ColumnType::Text,
                            reason,
                        });
                        (ColumnType::Text, cast_raw_texts(&values))
                    },
                },
                ColumnType::Timestamp => (ColumnType::Timestamp, cast_timestamps(&values)),
                ColumnType::Text => (ColumnType::Text, self.cast_texts(&values)),
            };

            columns.push(Column { name, column_type });
            column_cells.push(cells);
        }

        let rows = transpose(column_cells, records.len());
        let mut table = Table::new(columns, rows);
        log_classification(&table);

        match table.column_index(SORT_COLUMN) {
            Some(idx) => {
                table.sort_by_column(idx);
                info!(column = %table.columns()[idx].name, "Sorted rows ascending");
            },
            None => debug!("No {} column, keeping arrival order", SORT_COLUMN),
        }

        for (i, row) in table.rows().iter().take(PREVIEW_ROWS).enumerate() {
            let rendered: Vec<String> = row
                .iter()
                .map(|c| c.render().unwrap_or_else(|| "<null>".to_string()))
                .collect();
            debug!(row = i, values = ?rendered, "Preview");
        }

        NormalizedTable { table, diagnostics }
    }

    fn cast_texts(&self, values: &[Option<&Value>]) -> Vec<Cell> {
        values
            .iter()
            .map(|value| Cell::Text(Some(render_text(*value, self.text_null))))
            .collect()
    }
}

/// Text fallback for a column that failed its typed cast; nulls stay null.
fn cast_raw_texts(values: &[Option<&Value>]) -> Vec<Cell> {
    values
        .iter()
        .map(|value| match value {
            None | Some(Value::Null) => Cell::Text(None),
            Some(_) => Cell::Text(Some(render_text(*value, TextNullPolicy::Empty))),
        })
        .collect()
}

fn collect_columns(records: &[Record]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for record in records {
        for key in record.keys() {
            if seen.insert(key.as_str()) {
                names.push(key.clone());
            }
        }
    }
    names
}

fn transpose(columns: Vec<Vec<Cell>>, row_count: usize) -> Vec<Vec<Cell>> {
    let mut rows: Vec<Vec<Cell>> = (0..row_count)
        .map(|_| Vec::with_capacity(columns.len()))
        .collect();
    for column in columns {
        for (row, cell) in rows.iter_mut().zip(column) {
            row.push(cell);
        }
    }
    rows
}

fn log_classification(table: &Table) {
    let names_of = |wanted: ColumnType| -> Vec<&str> {
        table
            .columns()
            .iter()
            .filter(|c| c.column_type == wanted)
            .map(|c| c.name.as_str())
            .collect()
    };
    info!(
        rows = table.len(),
        integer = ?names_of(ColumnType::Integer),
        timestamp = ?names_of(ColumnType::Timestamp),
        text = ?names_of(ColumnType::Text),
        "Classified columns"
    );
}

/// Cast a whole column; `Err` means the column cannot be integer-typed.
fn cast_integers(values: &[Option<&Value>]) -> Result<Vec<Cell>, String> {
    values
        .iter()
        .map(|value| parse_integer(*value).map(Cell::Integer))
        .collect()
}

/// `Ok(None)` for missing or unparseable input; `Err` only for numbers that
/// exist but are not whole.
fn parse_integer(value: Option<&Value>) -> Result<Option<i64>, String> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(i64::from(*b))),
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_i64() {
                return Ok(Some(v));
            }
            match n.as_f64() {
                Some(f) => float_to_integer(f),
                None => Ok(None),
            }
        },
        Some(Value::String(s)) => {
            let s = s.trim();
            if let Ok(v) = s.parse::<i64>() {
                return Ok(Some(v));
            }
            match s.parse::<f64>() {
                Ok(f) => float_to_integer(f),
                Err(_) => Ok(None),
            }
        },
        Some(Value::Array(_)) | Some(Value::Object(_)) => Ok(None),
    }
}

fn float_to_integer(f: f64) -> Result<Option<i64>, String> {
    if !f.is_finite() {
        return Ok(None);
    }
    if f.fract() != 0.0 {
        return Err(format!("value {f} is not a whole number"));
    }
    if f < i64::MIN as f64 || f >= i64::MAX as f64 {
        return Err(format!("value {f} is out of integer range"));
    }
    Ok(Some(f as i64))
}

fn cast_timestamps(values: &[Option<&Value>]) -> Vec<Cell> {
    values
        .iter()
        .map(|value| {
            let parsed = match value {
                Some(Value::String(s)) => parse_datetime(s).map(|dt| dt.naive_utc()),
                _ => None,
            };
            Cell::Timestamp(parsed)
        })
        .collect()
}

fn render_text(value: Option<&Value>, null_policy: TextNullPolicy) -> String {
    match value {
        None | Some(Value::Null) => null_policy.render().to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(values: Vec<Value>) -> Vec<Record> {
        values
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn normalizer() -> Normalizer {
        Normalizer::default()
    }

    #[test]
    fn test_integer_column_with_bad_value() {
        let input = records(vec![
            json!({"id": "1", "name": "a", "created_at": "2023-01-01T00:00:00Z"}),
            json!({"id": "2", "name": "b", "created_at": "2023-01-02T00:00:00Z"}),
            json!({"id": "bad", "name": "c", "created_at": "2023-01-03T00:00:00Z"}),
        ]);
        let result = normalizer().normalize(&input);
        let ids: Vec<_> = result.table.rows().iter().map(|r| r[0].clone()).collect();
        assert_eq!(
            ids,
            vec![Cell::Integer(Some(1)), Cell::Integer(Some(2)), Cell::Integer(None)]
        );
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_sort_by_created_at() {
        let input = records(vec![
            json!({"id": 1, "created_at": "2023-03-02T10:00:00Z"}),
            json!({"id": 2, "created_at": "2022-01-01T00:00:00Z"}),
        ]);
        let table = normalizer().normalize(&input).table;
        assert_eq!(table.get(0, "id"), Some(&Cell::Integer(Some(2))));
        assert_eq!(
            table.get(0, "created_at").unwrap().render().as_deref(),
            Some("2022-01-01 00:00:00")
        );
        assert_eq!(
            table.get(1, "created_at").unwrap().render().as_deref(),
            Some("2023-03-02 10:00:00")
        );
    }

    #[test]
    fn test_sort_is_stable_with_nulls_first() {
        let input = records(vec![
            json!({"id": 1, "Created_At": "2023-01-01 00:00:00"}),
            json!({"id": 2, "Created_At": "garbage"}),
            json!({"id": 3, "Created_At": "2023-01-01 00:00:00"}),
            json!({"id": 4}),
        ]);
        let table = normalizer().normalize(&input).table;
        let ids: Vec<_> = (0..4).map(|i| table.get(i, "id").cloned().unwrap()).collect();
        assert_eq!(
            ids,
            vec![
                Cell::Integer(Some(2)),
                Cell::Integer(Some(4)),
                Cell::Integer(Some(1)),
                Cell::Integer(Some(3)),
            ]
        );
    }

    #[test]
    fn test_arrival_order_without_created_at() {
        let input = records(vec![json!({"id": 9}), json!({"id": 3}), json!({"id": 5})]);
        let table = normalizer().normalize(&input).table;
        let ids: Vec<_> = table.rows().iter().map(|r| r[0].clone()).collect();
        assert_eq!(
            ids,
            vec![Cell::Integer(Some(9)), Cell::Integer(Some(3)), Cell::Integer(Some(5))]
        );
    }

    #[test]
    fn test_text_rendering_and_none_quirk() {
        let input = records(vec![
            json!({"subject": "hello", "score": 4.5, "vip": true, "tags": ["a"]}),
            json!({"subject": null}),
        ]);
        let table = normalizer().normalize(&input).table;
        assert_eq!(table.get(0, "score"), Some(&Cell::Text(Some("4.5".into()))));
        assert_eq!(table.get(0, "vip"), Some(&Cell::Text(Some("true".into()))));
        assert_eq!(table.get(0, "tags"), Some(&Cell::Text(Some("[\"a\"]".into()))));
        assert_eq!(table.get(1, "subject"), Some(&Cell::Text(Some("None".into()))));
        assert_eq!(table.get(1, "score"), Some(&Cell::Text(Some("None".into()))));

        let empty = Normalizer::new(ColumnClassification::default(), TextNullPolicy::Empty);
        let table = empty.normalize(&input).table;
        assert_eq!(table.get(1, "subject"), Some(&Cell::Text(Some(String::new()))));
    }

    #[test]
    fn test_column_union_in_first_seen_order() {
        let input = records(vec![json!({"b": "1", "a": "2"}), json!({"c": "3", "a": "4"})]);
        let table = normalizer().normalize(&input).table;
        assert_eq!(table.column_names(), vec!["b", "a", "c"]);
        assert_eq!(table.get(1, "b"), Some(&Cell::Text(Some("None".into()))));
    }

    #[test]
    fn test_integer_coercions() {
        let input = records(vec![
            json!({"qty": 3.0, "is_active": true, "amount": " 42 "}),
            json!({"qty": "7.0", "is_active": false, "amount": ""}),
            json!({"qty": null, "is_active": "yes", "amount": {"v": 1}}),
        ]);
        let table = normalizer().normalize(&input).table;
        assert_eq!(table.get(0, "qty"), Some(&Cell::Integer(Some(3))));
        assert_eq!(table.get(1, "qty"), Some(&Cell::Integer(Some(7))));
        assert_eq!(table.get(2, "qty"), Some(&Cell::Integer(None)));
        assert_eq!(table.get(0, "is_active"), Some(&Cell::Integer(Some(1))));
        assert_eq!(table.get(1, "is_active"), Some(&Cell::Integer(Some(0))));
        assert_eq!(table.get(2, "is_active"), Some(&Cell::Integer(None)));
        assert_eq!(table.get(0, "amount"), Some(&Cell::Integer(Some(42))));
        assert_eq!(table.get(1, "amount"), Some(&Cell::Integer(None)));
        assert_eq!(table.get(2, "amount"), Some(&Cell::Integer(None)));
    }

    #[test]
    fn test_fractional_integer_column_degrades_to_text() {
        let input = records(vec![json!({"amount": 10}), json!({"amount": 12.5})]);
        let result = normalizer().normalize(&input);
        assert_eq!(result.table.columns()[0].column_type, ColumnType::Text);
        assert_eq!(result.table.get(1, "amount"), Some(&Cell::Text(Some("12.5".into()))));
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].column, "amount");
        assert_eq!(result.diagnostics[0].requested, ColumnType::Integer);
    }

    #[test]
    fn test_degraded_column_keeps_nulls_empty() {
        let input = records(vec![
            json!({"id": 1, "amount": 12.5}),
            json!({"id": 2, "amount": null}),
            json!({"id": 3}),
        ]);
        let table = normalizer().normalize(&input).table;
        assert_eq!(table.get(1, "amount").unwrap().render(), None);
        assert_eq!(table.get(2, "amount"), Some(&Cell::Text(None)));

        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "id,amount\n1,12.5\n2,\n3,\n");
    }

    #[test]
    fn test_timestamp_parsing() {
        let input = records(vec![
            json!({"updated_at": "2024-05-01T08:30:15+07:00"}),
            json!({"updated_at": "2024-05-01 08:30:15"}),
            json!({"updated_at": 1714552215}),
            json!({"updated_at": "soon"}),
        ]);
        let table = normalizer().normalize(&input).table;
        let rendered: Vec<_> = table.rows().iter().map(|r| r[0].render()).collect();
        assert_eq!(
            rendered,
            vec![
                Some("2024-05-01 01:30:15".to_string()),
                Some("2024-05-01 08:30:15".to_string()),
                None,
                None,
            ]
        );
    }

    #[test]
    fn test_empty_input() {
        let result = normalizer().normalize(&[]);
        assert!(result.table.is_empty());
        assert!(result.table.columns().is_empty());
    }
}
