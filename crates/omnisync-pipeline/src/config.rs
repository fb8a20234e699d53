//! Configuration management
//!
//! The core never reads the environment. The binary builds an [`AppConfig`]
//! once with [`AppConfig::load`] and hands the pieces to the components.

use crate::normalize::{ColumnClassification, TextNullPolicy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Per-request timeout for the ingestion API in seconds.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 600;

/// Key of the records array in each API page.
pub const DEFAULT_OBJECT_KEY: &str = "deals";

/// Records requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// Attempts per page before the fetch stops.
pub const DEFAULT_MAX_RETRIES_PER_PAGE: u32 = 10;

/// BigQuery REST root.
pub const DEFAULT_BIGQUERY_BASE_URL: &str = "https://bigquery.googleapis.com";

/// Delay between warehouse job status polls in milliseconds.
pub const DEFAULT_JOB_POLL_INTERVAL_MS: u64 = 1000;

/// Project used by `--dry-run` when `GCP_PROJECT` is unset.
pub const DRY_RUN_PROJECT: &str = "local";

/// Dataset used by `--dry-run` when `BQ_DATASET` is unset.
pub const DRY_RUN_DATASET: &str = "dry_run";

/// Ingestion API connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Endpoint returning one page of objects, e.g. `https://api.example.com/api/v1/deals`
    pub url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub timeout_secs: u64,
}

impl ApiConfig {
    /// Load from `OMNISYNC_API_URL`, `OMNISYNC_API_KEY`, `OMNISYNC_API_TIMEOUT_SECS`
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            url: std::env::var("OMNISYNC_API_URL").unwrap_or_default(),
            api_key: std::env::var("OMNISYNC_API_KEY").unwrap_or_default(),
            timeout_secs: std::env::var("OMNISYNC_API_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_API_TIMEOUT_SECS),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            anyhow::bail!("OMNISYNC_API_URL must be set");
        }
        if self.api_key.is_empty() {
            anyhow::bail!("OMNISYNC_API_KEY must be set");
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("OMNISYNC_API_TIMEOUT_SECS must be greater than 0");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Pagination settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchConfig {
    pub object_key: String,
    pub page_size: u32,
    pub max_retries_per_page: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            object_key: DEFAULT_OBJECT_KEY.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            max_retries_per_page: DEFAULT_MAX_RETRIES_PER_PAGE,
        }
    }
}

impl FetchConfig {
    /// Load from `OMNISYNC_OBJECT_KEY`, `OMNISYNC_PAGE_SIZE`, `OMNISYNC_MAX_RETRIES`
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            object_key: std::env::var("OMNISYNC_OBJECT_KEY")
                .unwrap_or_else(|_| DEFAULT_OBJECT_KEY.to_string()),
            page_size: std::env::var("OMNISYNC_PAGE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_PAGE_SIZE),
            max_retries_per_page: std::env::var("OMNISYNC_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_RETRIES_PER_PAGE),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.object_key.trim().is_empty() {
            anyhow::bail!("OMNISYNC_OBJECT_KEY cannot be empty");
        }
        if self.page_size == 0 {
            anyhow::bail!("OMNISYNC_PAGE_SIZE must be greater than 0");
        }
        if self.max_retries_per_page == 0 {
            anyhow::bail!("OMNISYNC_MAX_RETRIES must be greater than 0");
        }
        Ok(())
    }
}

/// Warehouse location and access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub project: String,
    pub dataset: String,
    /// OAuth access token; obtaining it is the caller's job
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub base_url: String,
    /// Job location (e.g. "US", "asia-southeast1"); `None` lets BigQuery decide
    pub location: Option<String>,
    pub poll_interval_ms: u64,
    /// Directory for the per-load CSV file; system temp dir when `None`
    pub staging_dir: Option<PathBuf>,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            dataset: String::new(),
            access_token: None,
            base_url: DEFAULT_BIGQUERY_BASE_URL.to_string(),
            location: None,
            poll_interval_ms: DEFAULT_JOB_POLL_INTERVAL_MS,
            staging_dir: None,
        }
    }
}

impl WarehouseConfig {
    /// Load from `GCP_PROJECT`, `BQ_DATASET`, `BQ_ACCESS_TOKEN`, `BQ_BASE_URL`,
    /// `BQ_LOCATION`, `BQ_POLL_INTERVAL_MS`, `OMNISYNC_STAGING_DIR`
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self::read_env(String::new(), String::new());
        config.validate()?;
        Ok(config)
    }

    /// Like [`Self::from_env`], but an unset project or dataset falls back to
    /// [`DRY_RUN_PROJECT`] / [`DRY_RUN_DATASET`]. Every other setting is still
    /// validated.
    pub fn dry_run_from_env() -> anyhow::Result<Self> {
        let config = Self::read_env(DRY_RUN_PROJECT.to_string(), DRY_RUN_DATASET.to_string());
        config.validate()?;
        Ok(config)
    }

    fn read_env(default_project: String, default_dataset: String) -> Self {
        Self {
            project: std::env::var("GCP_PROJECT")
                .ok()
                .filter(|p| !p.is_empty())
                .unwrap_or(default_project),
            dataset: std::env::var("BQ_DATASET")
                .ok()
                .filter(|d| !d.is_empty())
                .unwrap_or(default_dataset),
            access_token: std::env::var("BQ_ACCESS_TOKEN").ok().filter(|t| !t.is_empty()),
            base_url: std::env::var("BQ_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BIGQUERY_BASE_URL.to_string()),
            location: std::env::var("BQ_LOCATION").ok().filter(|l| !l.is_empty()),
            poll_interval_ms: std::env::var("BQ_POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_JOB_POLL_INTERVAL_MS),
            staging_dir: std::env::var("OMNISYNC_STAGING_DIR").ok().map(PathBuf::from),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.project.is_empty() {
            anyhow::bail!("GCP_PROJECT must be set");
        }
        if self.dataset.is_empty() {
            anyhow::bail!("BQ_DATASET must be set");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("BQ_POLL_INTERVAL_MS must be greater than 0");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Column typing rules
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizeConfig {
    /// Extra integer column names on top of the built-in list
    pub integer_columns: Vec<String>,
    /// Extra timestamp column names on top of the built-in list
    pub timestamp_columns: Vec<String>,
    pub text_null: TextNullPolicy,
}

impl NormalizeConfig {
    /// Load from `OMNISYNC_INTEGER_COLUMNS`, `OMNISYNC_TIMESTAMP_COLUMNS`
    /// (comma separated) and `OMNISYNC_TEXT_NULL` (`none` | `empty`)
    pub fn from_env() -> anyhow::Result<Self> {
        let text_null = match std::env::var("OMNISYNC_TEXT_NULL") {
            Ok(value) => value.parse()?,
            Err(_) => TextNullPolicy::default(),
        };

        Ok(Self {
            integer_columns: split_list(std::env::var("OMNISYNC_INTEGER_COLUMNS").ok()),
            timestamp_columns: split_list(std::env::var("OMNISYNC_TIMESTAMP_COLUMNS").ok()),
            text_null,
        })
    }

    /// Built-in classification extended with the configured names
    pub fn classification(&self) -> ColumnClassification {
        let mut classification = ColumnClassification::default();
        for name in &self.integer_columns {
            classification = classification.with_integer(name);
        }
        for name in &self.timestamp_columns {
            classification = classification.with_timestamp(name);
        }
        classification
    }
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Everything the binary needs for one run
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub fetch: FetchConfig,
    pub warehouse: WarehouseConfig,
    pub normalize: NormalizeConfig,
}

impl AppConfig {
    /// Load configuration from `.env` (if present) and the environment
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            api: ApiConfig::from_env()?,
            fetch: FetchConfig::from_env()?,
            warehouse: WarehouseConfig::from_env()?,
            normalize: NormalizeConfig::from_env()?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::table::ColumnType;

    #[test]
    fn test_fetch_defaults() {
        let config = FetchConfig::default();
        assert_eq!(config.object_key, "deals");
        assert_eq!(config.page_size, 500);
        assert_eq!(config.max_retries_per_page, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fetch_validation() {
        let config = FetchConfig {
            page_size: 0,
            ..FetchConfig::default()
        };
        assert!(config.validate().is_err());

        let config = FetchConfig {
            max_retries_per_page: 0,
            ..FetchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_warehouse_validation() {
        let config = WarehouseConfig {
            project: "acme".into(),
            dataset: "crm".into(),
            ..WarehouseConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), Duration::from_secs(1));

        let config = WarehouseConfig {
            project: "acme".into(),
            ..WarehouseConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(Some(" a, b ,,c".into())), vec!["a", "b", "c"]);
        assert!(split_list(None).is_empty());
    }

    #[test]
    fn test_normalize_classification_extends_defaults() {
        let config = NormalizeConfig {
            integer_columns: vec!["Priority".into()],
            timestamp_columns: vec!["due_at".into()],
            text_null: TextNullPolicy::Empty,
        };
        let classification = config.classification();
        assert_eq!(classification.classify("priority"), ColumnType::Integer);
        assert_eq!(classification.classify("DUE_AT"), ColumnType::Timestamp);
        assert_eq!(classification.classify("id"), ColumnType::Integer);
        assert_eq!(classification.classify("subject"), ColumnType::Text);
    }
}
