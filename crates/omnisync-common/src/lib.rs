//! Omnisync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the omnisync workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CommonError`] and the [`Result`] alias
//! - **Types**: [`TimeWindow`] and the raw [`Record`] shape returned by the ingestion API
//! - **Logging**: `tracing` subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use omnisync_common::{Result, TimeWindow};
//!
//! fn window() -> Result<TimeWindow> {
//!     let window = TimeWindow::parse("2024-01-01 00:00:00", "2024-01-31 23:59:59")?;
//!     println!("fetching {} .. {}", window.since_param(), window.to_param());
//!     Ok(window)
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
pub use types::{Record, TimeWindow};
