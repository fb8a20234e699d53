//! Shared domain types

use crate::error::{CommonError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::fmt;

/// Wire format of `created_since` / `created_to` query parameters.
pub const API_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// One business object as returned by the ingestion API.
///
/// Field order follows the JSON document (`serde_json` is built with
/// `preserve_order`).
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Naive layouts accepted in addition to RFC 3339. All are read as UTC.
const NAIVE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse the date/time forms the API and operators use.
///
/// Offsets are normalised to UTC; naive values are assumed to already be UTC.
/// Returns `None` for anything unrecognised.
pub fn parse_datetime(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Inclusive UTC window passed to the ingestion API.
///
/// Constructed once per run; `since <= to` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    since: DateTime<Utc>,
    to: DateTime<Utc>,
}

impl TimeWindow {
    /// Build a window, rejecting `since > to`
    pub fn new(since: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self> {
        if since > to {
            return Err(CommonError::invalid_window(format!(
                "start {} is after end {}",
                since.format(API_DATETIME_FORMAT),
                to.format(API_DATETIME_FORMAT)
            )));
        }
        Ok(Self { since, to })
    }

    /// Parse both bounds from operator input
    pub fn parse(since: &str, to: &str) -> Result<Self> {
        let since_dt = parse_datetime(since)
            .ok_or_else(|| CommonError::invalid_window(format!("unrecognised start '{since}'")))?;
        let to_dt = parse_datetime(to)
            .ok_or_else(|| CommonError::invalid_window(format!("unrecognised end '{to}'")))?;
        Self::new(since_dt, to_dt)
    }

    pub fn since(&self) -> DateTime<Utc> {
        self.since
    }

    pub fn to(&self) -> DateTime<Utc> {
        self.to
    }

    /// `created_since` query value
    pub fn since_param(&self) -> String {
        self.since.format(API_DATETIME_FORMAT).to_string()
    }

    /// `created_to` query value
    pub fn to_param(&self) -> String {
        self.to.format(API_DATETIME_FORMAT).to_string()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} .. {}]", self.since_param(), self.to_param())
    }
}
