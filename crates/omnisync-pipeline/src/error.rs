//! Error types for the omnisync pipeline
//!
//! Each layer has its own error enum. [`PipelineError`] is what callers see:
//! every variant knows the [`Stage`] it aborted in and keeps the underlying
//! cause as its `source()`.

use omnisync_common::CommonError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type alias for pipeline runs
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline stage at which a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    Fetch,
    Normalize,
    ListTables,
    Load,
    Merge,
    Drop,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validate => "validate",
            Stage::Fetch => "fetch",
            Stage::Normalize => "normalize",
            Stage::ListTables => "list_tables",
            Stage::Load => "load",
            Stage::Merge => "merge",
            Stage::Drop => "drop",
        };
        f.write_str(name)
    }
}

/// Failure of a single page request
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed page: {0}")]
    Malformed(String),
}

/// Failure of a warehouse operation
#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("warehouse request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("warehouse returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("warehouse job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("table not found: {0}")]
    NotFound(String),

    #[error("staging file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV encoding error: {0}")]
    Csv(#[from] csv::Error),

    #[error("unexpected warehouse response: {0}")]
    UnexpectedResponse(String),

    #[error("invalid merge: {0}")]
    InvalidMerge(String),
}

impl WarehouseError {
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::UnexpectedResponse(msg.into())
    }

    pub fn invalid_merge(msg: impl Into<String>) -> Self {
        Self::InvalidMerge(msg.into())
    }
}

/// Stage-tagged error returned by [`crate::pipeline::Pipeline::run`]
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid time window: {0}")]
    InvalidTimeWindow(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Fetch gave up on page {page} after {attempts} attempts with no records collected: {last_error}")]
    FetchExhausted {
        page: u32,
        attempts: u32,
        last_error: String,
    },

    #[error("No records returned for window {window}")]
    EmptyResult { window: String },

    #[error("Could not connect to warehouse dataset '{dataset}'")]
    WarehouseConnect {
        dataset: String,
        #[source]
        source: WarehouseError,
    },

    #[error("Main table '{table}' does not exist in dataset '{dataset}'")]
    MainTableNotFound { table: String, dataset: String },

    #[error("Loading into '{table}' failed")]
    LoadFailed {
        table: String,
        #[source]
        source: WarehouseError,
    },

    #[error("Merging '{staging}' into '{main}' failed; staging table left in place")]
    MergeFailed {
        staging: String,
        main: String,
        #[source]
        source: WarehouseError,
    },
}

impl PipelineError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Stage the run was in when it aborted
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::InvalidTimeWindow(_) | PipelineError::InvalidRequest(_) => {
                Stage::Validate
            },
            PipelineError::FetchExhausted { .. } | PipelineError::EmptyResult { .. } => {
                Stage::Fetch
            },
            PipelineError::WarehouseConnect { .. } | PipelineError::MainTableNotFound { .. } => {
                Stage::ListTables
            },
            PipelineError::LoadFailed { .. } => Stage::Load,
            PipelineError::MergeFailed { .. } => Stage::Merge,
        }
    }
}

impl From<CommonError> for PipelineError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::InvalidTimeWindow(msg) => PipelineError::InvalidTimeWindow(msg),
            CommonError::Config(msg) => PipelineError::InvalidRequest(msg),
        }
    }
}
