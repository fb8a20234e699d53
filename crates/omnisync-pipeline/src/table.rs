//! Typed tabular data produced by the normalizer

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::io::Write;

/// Canonical rendering of timestamp cells (second precision, no zone).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Type assigned to a whole column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Timestamp,
    Text,
}

/// One value, tagged with its column's type
///
/// Any cell may be null. Text columns read from the API substitute the
/// configured null text instead, so only degraded columns hold null text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Integer(Option<i64>),
    Timestamp(Option<NaiveDateTime>),
    Text(Option<String>),
}

impl Cell {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Cell::Integer(_) => ColumnType::Integer,
            Cell::Timestamp(_) => ColumnType::Timestamp,
            Cell::Text(_) => ColumnType::Text,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Integer(None) | Cell::Timestamp(None) | Cell::Text(None))
    }

    /// Text form written to the warehouse; `None` for null cells
    pub fn render(&self) -> Option<String> {
        match self {
            Cell::Integer(value) => value.map(|v| v.to_string()),
            Cell::Timestamp(value) => value.map(|v| v.format(TIMESTAMP_FORMAT).to_string()),
            Cell::Text(value) => value.clone(),
        }
    }

    /// Ordering used by the sort step: null first, then natural order.
    ///
    /// Cells of different types compare equal; columns are uniform so this
    /// never happens within one sort.
    pub fn sort_cmp(&self, other: &Cell) -> Ordering {
        match (self, other) {
            (Cell::Integer(a), Cell::Integer(b)) => a.cmp(b),
            (Cell::Timestamp(a), Cell::Timestamp(b)) => a.cmp(b),
            (Cell::Text(a), Cell::Text(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

/// Rows over a shared, ordered column set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<Column>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    /// Build a table; every row must have one cell per column.
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Cell>>) -> Self {
        debug_assert!(rows.iter().all(|row| row.len() == columns.len()));
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column, matched case-insensitively
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Cell at `row` in column `name`
    pub fn get(&self, row: usize, name: &str) -> Option<&Cell> {
        let idx = self.column_index(name)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Stable ascending sort on one column, nulls first
    pub fn sort_by_column(&mut self, idx: usize) {
        if idx >= self.columns.len() {
            return;
        }
        self.rows.sort_by(|a, b| a[idx].sort_cmp(&b[idx]));
    }

    /// Write a header line followed by one CSV record per row.
    ///
    /// Null cells become empty fields, which the warehouse reads as NULL.
    pub fn write_csv<W: Write>(&self, writer: W) -> csv::Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(self.columns.iter().map(|c| c.name.as_str()))?;
        for row in &self.rows {
            csv_writer.write_record(row.iter().map(|cell| cell.render().unwrap_or_default()))?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}
