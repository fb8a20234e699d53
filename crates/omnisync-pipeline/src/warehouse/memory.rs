//! In-process warehouse
//!
//! Holds tables as rows of nullable strings, exactly as they arrive in the
//! CSV upload. MERGE follows BigQuery's rules: `NULL` keys never match, a
//! target row may be matched by at most one source row, and a failing merge
//! leaves the target untouched.

use super::{MergeStatement, Result, TableRef, WarehouseBackend};
use crate::error::WarehouseError;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Snapshot of one in-memory table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl MemoryTable {
    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Value of `column` in row `row`
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)?.as_deref()
    }

    /// Index of the first row whose `column` equals `value`
    pub fn find(&self, column: &str, value: &str) -> Option<usize> {
        let idx = self.column_index(column)?;
        self.rows
            .iter()
            .position(|r| r.get(idx).and_then(|v| v.as_deref()) == Some(value))
    }
}

/// Operations that can be told to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    List,
    Load,
    Merge,
    Delete,
}

/// Warehouse backed by process memory, keyed by `(dataset, table)`
#[derive(Debug, Default)]
pub struct InMemoryWarehouse {
    tables: Mutex<BTreeMap<(String, String), MemoryTable>>,
    failures: Mutex<HashSet<FailPoint>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key(table: &TableRef) -> (String, String) {
    (table.dataset.clone(), table.table.clone())
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a table directly
    pub fn insert_table(&self, dataset: &str, table: &str, contents: MemoryTable) {
        lock(&self.tables).insert((dataset.to_string(), table.to_string()), contents);
    }

    /// Copy of a table's current contents
    pub fn table(&self, dataset: &str, table: &str) -> Option<MemoryTable> {
        lock(&self.tables)
            .get(&(dataset.to_string(), table.to_string()))
            .cloned()
    }

    /// Make the next call of `point` fail
    pub fn fail_next(&self, point: FailPoint) {
        lock(&self.failures).insert(point);
    }

    fn maybe_fail(&self, point: FailPoint) -> Result<()> {
        if lock(&self.failures).remove(&point) {
            return Err(WarehouseError::Api {
                status: 503,
                message: format!("simulated {point:?} failure"),
            });
        }
        Ok(())
    }

    fn read_csv(path: &Path) -> Result<MemoryTable> {
        let mut reader = csv::Reader::from_path(path)?;
        let columns = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(
                record
                    .iter()
                    .map(|field| (!field.is_empty()).then(|| field.to_string()))
                    .collect(),
            );
        }
        Ok(MemoryTable { columns, rows })
    }
}

/// Apply `statement` to copies of the tables; `Err` leaves `main` as it was.
fn merge_rows(
    statement: &MergeStatement,
    main: &MemoryTable,
    staging: &MemoryTable,
) -> Result<Vec<Vec<Option<String>>>> {
    let missing = |table: &TableRef, column: &str| {
        WarehouseError::JobFailed {
            job_id: "memory".to_string(),
            message: format!("Name {column} not found inside {table}"),
        }
    };

    let main_key = main
        .column_index(&statement.key_field)
        .ok_or_else(|| missing(&statement.main, &statement.key_field))?;
    let staging_key = staging
        .column_index(&statement.key_field)
        .ok_or_else(|| missing(&statement.staging, &statement.key_field))?;

    let resolve = |columns: Vec<&str>| -> Result<Vec<(usize, usize)>> {
        columns
            .into_iter()
            .map(|c| {
                let m = main.column_index(c).ok_or_else(|| missing(&statement.main, c))?;
                let s = staging
                    .column_index(c)
                    .ok_or_else(|| missing(&statement.staging, c))?;
                Ok((m, s))
            })
            .collect()
    };
    let update_pairs = resolve(statement.update_columns().collect())?;
    let insert_pairs = resolve(statement.columns.iter().map(String::as_str).collect())?;

    let mut matched: HashMap<usize, usize> = HashMap::new();
    let mut inserts = Vec::new();

    for (s_idx, s_row) in staging.rows.iter().enumerate() {
        let targets: Vec<usize> = match &s_row[staging_key] {
            None => Vec::new(),
            Some(k) => main
                .rows
                .iter()
                .enumerate()
                .filter(|(_, r)| r[main_key].as_ref() == Some(k))
                .map(|(i, _)| i)
                .collect(),
        };

        if targets.is_empty() {
            inserts.push(s_idx);
            continue;
        }
        for target in targets {
            if matched.insert(target, s_idx).is_some() {
                return Err(WarehouseError::JobFailed {
                    job_id: "memory".to_string(),
                    message: "UPDATE/MERGE must match at most one source row for each target row"
                        .to_string(),
                });
            }
        }
    }

    let mut rows = main.rows.clone();
    for (target, source) in matched {
        for &(m, s) in &update_pairs {
            rows[target][m] = staging.rows[source][s].clone();
        }
    }
    for source in inserts {
        let mut row = vec![None; main.columns.len()];
        for &(m, s) in &insert_pairs {
            row[m] = staging.rows[source][s].clone();
        }
        rows.push(row);
    }

    Ok(rows)
}

#[async_trait]
impl WarehouseBackend for InMemoryWarehouse {
    async fn list_tables(&self, dataset: &str) -> Result<BTreeSet<String>> {
        self.maybe_fail(FailPoint::List)?;
        Ok(lock(&self.tables)
            .keys()
            .filter(|(d, _)| d == dataset)
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn load_csv(&self, table: &TableRef, path: &Path) -> Result<()> {
        self.maybe_fail(FailPoint::Load)?;
        let contents = Self::read_csv(path)?;
        lock(&self.tables).insert(key(table), contents);
        Ok(())
    }

    async fn table_columns(&self, table: &TableRef) -> Result<Vec<String>> {
        lock(&self.tables)
            .get(&key(table))
            .map(|t| t.columns.clone())
            .ok_or_else(|| WarehouseError::NotFound(table.to_string()))
    }

    async fn execute_merge(&self, statement: &MergeStatement) -> Result<()> {
        self.maybe_fail(FailPoint::Merge)?;
        let mut tables = lock(&self.tables);

        let staging = tables
            .get(&key(&statement.staging))
            .ok_or_else(|| WarehouseError::NotFound(statement.staging.to_string()))?;
        let main = tables
            .get(&key(&statement.main))
            .ok_or_else(|| WarehouseError::NotFound(statement.main.to_string()))?;

        let rows = merge_rows(statement, main, staging)?;
        if let Some(main) = tables.get_mut(&key(&statement.main)) {
            main.rows = rows;
        }
        Ok(())
    }

    async fn count_rows(&self, table: &TableRef) -> Result<u64> {
        lock(&self.tables)
            .get(&key(table))
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| WarehouseError::NotFound(table.to_string()))
    }

    async fn delete_table(&self, table: &TableRef) -> Result<bool> {
        self.maybe_fail(FailPoint::Delete)?;
        Ok(lock(&self.tables).remove(&key(table)).is_some())
    }
}
