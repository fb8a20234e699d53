//! Pipeline orchestration
//!
//! ```text
//! START --fetch--> FETCHED --normalize--> NORMALIZED
//! NORMALIZED --new-->    LOAD(main) --> DONE
//! NORMALIZED --update--> LOAD(staging) --> MERGE(staging -> main) --> DROP(staging) --> DONE
//! any stage failure --> ABORTED(stage, cause)
//! ```
//!
//! Completed stages are never compensated: a failed MERGE leaves the staging
//! table behind for an operator to inspect or drop.

use crate::config::FetchConfig;
use crate::error::{PipelineError, Result, Stage};
use crate::fetch::{FetchExhausted, Fetcher};
use crate::normalize::{ColumnDiagnostic, Normalizer};
use crate::warehouse::{validate_table_name, WarehouseBackend, WarehouseLoader};
use omnisync_common::TimeWindow;
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

/// Join column used when an update does not name one.
pub const DEFAULT_MERGE_KEY: &str = "id";

/// What to do with the normalized table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Create (or replace) `table` with the fetched data
    New { table: String },
    /// Load into `staging_table`, merge into `main_table` on `key_field`,
    /// then drop the staging table
    Update {
        main_table: String,
        staging_table: String,
        key_field: String,
    },
}

impl Action {
    pub fn new_table(table: impl Into<String>) -> Self {
        Action::New {
            table: table.into(),
        }
    }

    /// Update keyed on [`DEFAULT_MERGE_KEY`]
    pub fn update(main_table: impl Into<String>, staging_table: impl Into<String>) -> Self {
        Action::Update {
            main_table: main_table.into(),
            staging_table: staging_table.into(),
            key_field: DEFAULT_MERGE_KEY.to_string(),
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::New { .. } => ActionKind::New,
            Action::Update { .. } => ActionKind::Update,
        }
    }

    /// Table that ends up holding the data
    pub fn target_table(&self) -> &str {
        match self {
            Action::New { table } => table,
            Action::Update { main_table, .. } => main_table,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Action::New { table } => {
                validate_table_name(table).map_err(PipelineError::InvalidRequest)?;
            },
            Action::Update {
                main_table,
                staging_table,
                key_field,
            } => {
                validate_table_name(main_table).map_err(PipelineError::InvalidRequest)?;
                validate_table_name(staging_table).map_err(PipelineError::InvalidRequest)?;
                if main_table.eq_ignore_ascii_case(staging_table) {
                    return Err(PipelineError::invalid_request(format!(
                        "staging table must differ from main table '{main_table}'"
                    )));
                }
                if key_field.trim().is_empty() {
                    return Err(PipelineError::invalid_request("merge key cannot be empty"));
                }
            },
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    New,
    Update,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::New => f.write_str("new"),
            ActionKind::Update => f.write_str("update"),
        }
    }
}

/// One pipeline invocation
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub window: TimeWindow,
    pub object_key: String,
    pub action: Action,
}

/// Something that went wrong without stopping the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineWarning {
    /// Fetch stopped early; later pages are missing from the load
    FetchExhausted(FetchExhausted),
    ColumnDegraded(ColumnDiagnostic),
    /// A `new` run overwrote an existing table
    TargetReplaced { table: String },
    /// Merge succeeded but the staging table is still there
    DropFailed { table: String, error: String },
}

impl PipelineWarning {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineWarning::FetchExhausted(_) => Stage::Fetch,
            PipelineWarning::ColumnDegraded(_) => Stage::Normalize,
            PipelineWarning::TargetReplaced { .. } => Stage::Load,
            PipelineWarning::DropFailed { .. } => Stage::Drop,
        }
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineResult {
    pub rows_fetched: usize,
    /// Rows written by the load step (into the staging table for updates)
    pub rows_loaded: u64,
    pub action: ActionKind,
    pub target_table: String,
    /// Rows in the target table once the run finished
    pub target_row_count: u64,
    pub pages_fetched: u32,
    pub warnings: Vec<PipelineWarning>,
}

/// Fetch → normalize → load, over one warehouse backend
pub struct Pipeline<B> {
    fetcher: Fetcher,
    normalizer: Normalizer,
    loader: WarehouseLoader<B>,
    fetch: FetchConfig,
}

impl<B: WarehouseBackend> Pipeline<B> {
    pub fn new(
        fetcher: Fetcher,
        normalizer: Normalizer,
        loader: WarehouseLoader<B>,
        fetch: FetchConfig,
    ) -> Self {
        Self {
            fetcher,
            normalizer,
            loader,
            fetch,
        }
    }

    pub fn loader(&self) -> &WarehouseLoader<B> {
        &self.loader
    }

    #[tracing::instrument(
        skip(self, request),
        fields(window = %request.window, action = %request.action.kind(), target = %request.action.target_table())
    )]
    pub async fn run(&self, request: &PipelineRequest) -> Result<PipelineResult> {
        request.action.validate()?;
        if request.object_key.trim().is_empty() {
            return Err(PipelineError::invalid_request("object key cannot be empty"));
        }

        let mut warnings = Vec::new();

        // FETCH
        let outcome = self
            .fetcher
            .fetch(
                &request.window,
                &request.object_key,
                self.fetch.page_size,
                self.fetch.max_retries_per_page,
            )
            .await;

        if outcome.records.is_empty() {
            return Err(match outcome.exhausted {
                Some(exhausted) => PipelineError::FetchExhausted {
                    page: exhausted.page,
                    attempts: exhausted.attempts,
                    last_error: exhausted.last_error,
                },
                None => PipelineError::EmptyResult {
                    window: request.window.to_string(),
                },
            });
        }
        if let Some(exhausted) = outcome.exhausted {
            warn!(
                page = exhausted.page,
                kept = outcome.records.len(),
                "Continuing with partial data"
            );
            warnings.push(PipelineWarning::FetchExhausted(exhausted));
        }
        let rows_fetched = outcome.records.len();

        // NORMALIZE
        let normalized = self.normalizer.normalize(&outcome.records);
        warnings.extend(
            normalized
                .diagnostics
                .into_iter()
                .map(PipelineWarning::ColumnDegraded),
        );
        let table = normalized.table;

        // LIST
        let dataset = self.loader.dataset();
        let existing = self.loader.list_tables(dataset).await.map_err(|source| {
            PipelineError::WarehouseConnect {
                dataset: dataset.to_string(),
                source,
            }
        })?;

        let (rows_loaded, target_row_count) = match &request.action {
            Action::New { table: target } => {
                if existing.contains(target) {
                    warn!(table = %target, "Target table exists and will be replaced");
                    warnings.push(PipelineWarning::TargetReplaced {
                        table: target.clone(),
                    });
                }

                let loaded = self.loader.load(target, &table).await.map_err(|source| {
                    PipelineError::LoadFailed {
                        table: target.clone(),
                        source,
                    }
                })?;
                (loaded, loaded)
            },
            Action::Update {
                main_table,
                staging_table,
                key_field,
            } => {
                if !existing.contains(main_table) {
                    return Err(PipelineError::MainTableNotFound {
                        table: main_table.clone(),
                        dataset: dataset.to_string(),
                    });
                }

                let loaded = self
                    .loader
                    .load(staging_table, &table)
                    .await
                    .map_err(|source| PipelineError::LoadFailed {
                        table: staging_table.clone(),
                        source,
                    })?;

                let merged = match self.loader.merge(staging_table, main_table, key_field).await {
                    Ok(count) => count,
                    Err(source) => {
                        warn!(table = %staging_table, "Merge failed, staging table left in place");
                        return Err(PipelineError::MergeFailed {
                            staging: staging_table.clone(),
                            main: main_table.clone(),
                            source,
                        });
                    },
                };

                if let Err(e) = self.loader.drop(staging_table).await {
                    warn!(table = %staging_table, error = %e, "Could not drop staging table");
                    warnings.push(PipelineWarning::DropFailed {
                        table: staging_table.clone(),
                        error: e.to_string(),
                    });
                }

                (loaded, merged)
            },
        };

        info!(
            rows_fetched,
            rows_loaded,
            target_row_count,
            warnings = warnings.len(),
            "Pipeline finished"
        );

        Ok(PipelineResult {
            rows_fetched,
            rows_loaded,
            action: request.action.kind(),
            target_table: request.action.target_table().to_string(),
            target_row_count,
            pages_fetched: outcome.pages_fetched,
            warnings,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_action_validation() {
        assert!(Action::new_table("sales_jan").validate().is_ok());
        assert!(Action::update("deals", "stg_deals").validate().is_ok());

        let err = Action::update("deals", "DEALS").validate().unwrap_err();
        assert_eq!(err.stage(), Stage::Validate);

        assert!(Action::new_table("bad name").validate().is_err());
        let blank_key = Action::Update {
            main_table: "deals".into(),
            staging_table: "stg".into(),
            key_field: " ".into(),
        };
        assert!(blank_key.validate().is_err());
    }

    #[test]
    fn test_action_accessors() {
        let action = Action::update("deals", "stg");
        assert_eq!(action.kind(), ActionKind::Update);
        assert_eq!(action.target_table(), "deals");
        assert_eq!(ActionKind::New.to_string(), "new");
    }

    #[test]
    fn test_warning_serialization() {
        let warning = PipelineWarning::DropFailed {
            table: "stg".into(),
            error: "503".into(),
        };
        let value = serde_json::to_value(&warning).unwrap();
        assert_eq!(value["kind"], "drop_failed");
        assert_eq!(warning.stage(), Stage::Drop);
    }
}
