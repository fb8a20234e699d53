//! Warehouse loading
//!
//! [`WarehouseLoader`] implements the load / merge / drop protocol on top of a
//! [`WarehouseBackend`], which only knows how to talk to one concrete
//! warehouse. Two backends ship with the crate:
//!
//! - [`bigquery::BigQueryBackend`]: BigQuery REST API
//! - [`memory::InMemoryWarehouse`]: process-local tables for tests and dry runs

pub mod bigquery;
mod merge;
pub mod memory;

pub use merge::MergeStatement;

use crate::config::WarehouseConfig;
use crate::error::WarehouseError;
use crate::table::Table;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Result type alias for warehouse operations
pub type Result<T> = std::result::Result<T, WarehouseError>;

/// Longest table name the warehouse accepts, in bytes.
pub const MAX_TABLE_NAME_LEN: usize = 1024;

/// Fully qualified table name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// Backtick-quoted form for SQL
    pub fn quoted(&self) -> String {
        format!("`{self}`")
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Check that `name` can be used as a table name inside backticks.
pub fn validate_table_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("table name cannot be empty".to_string());
    }
    if name.len() > MAX_TABLE_NAME_LEN {
        return Err(format!(
            "table name '{name}' is longer than {MAX_TABLE_NAME_LEN} bytes"
        ));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(format!(
            "table name '{name}' contains '{bad}'; use letters, digits, '_' or '-'"
        ));
    }
    Ok(())
}

/// Primitive operations of one warehouse
///
/// Every method blocks (awaits) until the warehouse reports a terminal state.
#[async_trait]
pub trait WarehouseBackend: Send + Sync {
    /// Table names in `dataset`
    async fn list_tables(&self, dataset: &str) -> Result<BTreeSet<String>>;

    /// Replace `table` with the CSV file at `path` (header row, autodetected schema)
    async fn load_csv(&self, table: &TableRef, path: &Path) -> Result<()>;

    /// Column names of `table` in schema order
    async fn table_columns(&self, table: &TableRef) -> Result<Vec<String>>;

    /// Run one MERGE statement atomically
    async fn execute_merge(&self, statement: &MergeStatement) -> Result<()>;

    /// `SELECT COUNT(*)` of `table`
    async fn count_rows(&self, table: &TableRef) -> Result<u64>;

    /// Delete `table`; `Ok(false)` when it did not exist
    async fn delete_table(&self, table: &TableRef) -> Result<bool>;
}

/// Load / merge / drop against one project and default dataset
pub struct WarehouseLoader<B> {
    backend: B,
    project: String,
    dataset: String,
    staging_dir: Option<PathBuf>,
}

impl<B: WarehouseBackend> WarehouseLoader<B> {
    pub fn new(backend: B, config: &WarehouseConfig) -> Self {
        Self {
            backend,
            project: config.project.clone(),
            dataset: config.dataset.clone(),
            staging_dir: config.staging_dir.clone(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn table_ref(&self, table: &str) -> TableRef {
        TableRef::new(&self.project, &self.dataset, table)
    }

    /// Enumerate tables in `dataset`
    pub async fn list_tables(&self, dataset: &str) -> Result<BTreeSet<String>> {
        let tables = self.backend.list_tables(dataset).await?;
        info!(project = %self.project, dataset, count = tables.len(), "Listed tables");
        Ok(tables)
    }

    /// Truncate-load `data` into `table_name` and return the row count the
    /// warehouse reports afterwards.
    ///
    /// The CSV upload file lives only for the duration of this call.
    pub async fn load(&self, table_name: &str, data: &Table) -> Result<u64> {
        let table = self.table_ref(table_name);
        let staging_file = self.write_staging_file(data)?;
        debug!(path = %staging_file.path().display(), rows = data.len(), "Wrote staging file");

        self.backend.load_csv(&table, staging_file.path()).await?;
        let count = self.backend.count_rows(&table).await?;
        drop(staging_file);

        if count != data.len() as u64 {
            warn!(
                table = %table,
                expected = data.len(),
                actual = count,
                "Row count after load differs from rows sent"
            );
        }
        info!(table = %table, rows = count, "Loaded table");
        Ok(count)
    }

    /// Upsert `staging_table` into `main_table` on `key_field`; returns the
    /// row count of the main table afterwards.
    pub async fn merge(&self, staging_table: &str, main_table: &str, key_field: &str) -> Result<u64> {
        let staging = self.table_ref(staging_table);
        let main = self.table_ref(main_table);

        let columns = self.backend.table_columns(&staging).await?;
        let statement = MergeStatement::new(main.clone(), staging, key_field, columns)?;
        debug!(sql = %statement.to_sql(), "Merge statement");

        self.backend.execute_merge(&statement).await?;
        let count = self.backend.count_rows(&main).await?;
        info!(table = %main, rows = count, "Merged into table");
        Ok(count)
    }

    /// Delete `table_name`; a missing table is not an error
    pub async fn drop(&self, table_name: &str) -> Result<bool> {
        let table = self.table_ref(table_name);
        let existed = self.backend.delete_table(&table).await?;
        if existed {
            info!(table = %table, "Dropped table");
        } else {
            debug!(table = %table, "Table already absent");
        }
        Ok(existed)
    }

    fn write_staging_file(&self, data: &Table) -> Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("omnisync-").suffix(".csv");
        let file = match &self.staging_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        data.write_csv(file.as_file())?;
        Ok(file)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_table_ref_formatting() {
        let table = TableRef::new("acme", "crm", "deals");
        assert_eq!(table.to_string(), "acme.crm.deals");
        assert_eq!(table.quoted(), "`acme.crm.deals`");
    }

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("sales_jan").is_ok());
        assert!(validate_table_name("staging-deal-2024").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("deals; DROP TABLE x").is_err());
        assert!(validate_table_name("a`b").is_err());
        assert!(validate_table_name(&"x".repeat(MAX_TABLE_NAME_LEN + 1)).is_err());
    }
}
