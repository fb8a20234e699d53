//! MERGE statement construction

use super::{Result, TableRef};
use crate::error::WarehouseError;

/// Upsert of a staging table into a main table on one key column
///
/// Matched rows get every non-key column overwritten; unmatched staging rows
/// are inserted with all columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStatement {
    pub main: TableRef,
    pub staging: TableRef,
    pub key_field: String,
    /// Staging columns in schema order
    pub columns: Vec<String>,
}

impl MergeStatement {
    /// Fails if the staging schema has no columns or lacks `key_field`.
    pub fn new(
        main: TableRef,
        staging: TableRef,
        key_field: &str,
        columns: Vec<String>,
    ) -> Result<Self> {
        if columns.is_empty() {
            return Err(WarehouseError::invalid_merge(format!(
                "staging table {staging} has no columns"
            )));
        }
        let key_field = columns
            .iter()
            .find(|c| c.eq_ignore_ascii_case(key_field))
            .cloned()
            .ok_or_else(|| {
                WarehouseError::invalid_merge(format!(
                    "key column '{key_field}' not found in staging table {staging}"
                ))
            })?;

        Ok(Self {
            main,
            staging,
            key_field,
            columns,
        })
    }

    /// Columns overwritten on match
    pub fn update_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .map(String::as_str)
            .filter(move |c| *c != self.key_field)
    }

    /// `a = S.a, b = S.b`
    pub fn set_clause(&self) -> String {
        self.update_columns()
            .map(|c| format!("{c} = S.{c}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `a, b`
    pub fn insert_columns(&self) -> String {
        self.columns.join(", ")
    }

    /// `S.a, S.b`
    pub fn insert_values(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("S.{c}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn to_sql(&self) -> String {
        let mut sql = format!(
            "MERGE {main} T\nUSING {staging} S\nON T.{key} = S.{key}\n",
            main = self.main.quoted(),
            staging = self.staging.quoted(),
            key = self.key_field,
        );
        // A key-only staging table has nothing to update on match.
        if self.update_columns().next().is_some() {
            sql.push_str(&format!("WHEN MATCHED THEN UPDATE SET {}\n", self.set_clause()));
        }
        sql.push_str(&format!(
            "WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
            self.insert_columns(),
            self.insert_values()
        ));
        sql
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn statement(columns: &[&str], key: &str) -> Result<MergeStatement> {
        MergeStatement::new(
            TableRef::new("acme", "crm", "deals"),
            TableRef::new("acme", "crm", "stg_deals"),
            key,
            columns.iter().map(|c| c.to_string()).collect(),
        )
    }

    #[test]
    fn test_clauses() {
        let merge = statement(&["id", "status"], "id").unwrap();
        assert_eq!(merge.set_clause(), "status = S.status");
        assert_eq!(merge.insert_columns(), "id, status");
        assert_eq!(merge.insert_values(), "S.id, S.status");
    }

    #[test]
    fn test_full_sql() {
        let merge = statement(&["id", "status", "amount"], "id").unwrap();
        assert_eq!(
            merge.to_sql(),
            "MERGE `acme.crm.deals` T\n\
             USING `acme.crm.stg_deals` S\n\
             ON T.id = S.id\n\
             WHEN MATCHED THEN UPDATE SET status = S.status, amount = S.amount\n\
             WHEN NOT MATCHED THEN INSERT (id, status, amount) VALUES (S.id, S.status, S.amount)"
        );
    }

    #[test]
    fn test_key_only_staging_skips_update() {
        let merge = statement(&["id"], "id").unwrap();
        let sql = merge.to_sql();
        assert!(!sql.contains("WHEN MATCHED"));
        assert!(sql.ends_with("INSERT (id) VALUES (S.id)"));
    }

    #[test]
    fn test_key_is_matched_case_insensitively() {
        let merge = statement(&["ID", "status"], "id").unwrap();
        assert_eq!(merge.key_field, "ID");
        assert!(merge.to_sql().contains("ON T.ID = S.ID"));
    }

    #[test]
    fn test_missing_key_or_columns() {
        assert!(matches!(
            statement(&["status"], "id"),
            Err(WarehouseError::InvalidMerge(_))
        ));
        assert!(matches!(statement(&[], "id"), Err(WarehouseError::InvalidMerge(_))));
    }
}
