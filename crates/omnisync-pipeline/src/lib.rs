//! Omnisync Pipeline
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Pulls time-windowed records from a paginated REST API, casts them into a
//! typed table, and loads them into BigQuery, either as a new table or as an
//! upsert into an existing one through a staging table.
//!
//! # Components
//!
//! - [`fetch::Fetcher`]: bounded-retry pagination
//! - [`normalize::Normalizer`]: column typing and `created_at` ordering
//! - [`warehouse::WarehouseLoader`]: truncate-load, merge, drop
//! - [`pipeline::Pipeline`]: runs the `new` or `update` workflow
//!
//! # Example
//!
//! ```no_run
//! use omnisync_common::TimeWindow;
//! use omnisync_pipeline::config::AppConfig;
//! use omnisync_pipeline::fetch::Fetcher;
//! use omnisync_pipeline::normalize::Normalizer;
//! use omnisync_pipeline::pipeline::{Action, Pipeline, PipelineRequest};
//! use omnisync_pipeline::warehouse::{bigquery::BigQueryBackend, WarehouseLoader};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let token = config.warehouse.access_token.clone().unwrap_or_default();
//!     let backend = BigQueryBackend::new(&config.warehouse, token)?;
//!     let pipeline = Pipeline::new(
//!         Fetcher::new(&config.api)?,
//!         Normalizer::new(config.normalize.classification(), config.normalize.text_null),
//!         WarehouseLoader::new(backend, &config.warehouse),
//!         config.fetch.clone(),
//!     );
//!
//!     let result = pipeline
//!         .run(&PipelineRequest {
//!             window: TimeWindow::parse("2024-01-01", "2024-01-31 23:59:59")?,
//!             object_key: "deals".into(),
//!             action: Action::update("deals", "stg_deals"),
//!         })
//!         .await?;
//!     println!("{} rows now in {}", result.target_row_count, result.target_table);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod normalize;
pub mod pipeline;
pub mod table;
pub mod warehouse;

pub use error::{PipelineError, Stage};
pub use pipeline::{Action, ActionKind, Pipeline, PipelineRequest, PipelineResult, PipelineWarning};
