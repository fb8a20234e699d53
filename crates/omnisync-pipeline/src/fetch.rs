//! Paginated retrieval from the ingestion API
//!
//! Pages are requested strictly one after another. A page that keeps failing
//! is retried immediately, with no backoff, up to `max_retries_per_page`
//! attempts; after that the whole fetch stops and returns what earlier pages
//! produced, together with a [`FetchExhausted`] report.

use crate::config::ApiConfig;
use crate::error::FetchError;
use omnisync_common::{Record, TimeWindow};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// A page whose retries ran out; it and every later page were skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchExhausted {
    pub page: u32,
    pub attempts: u32,
    pub last_error: String,
}

/// Records collected for one window
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Records in arrival order
    pub records: Vec<Record>,
    /// Page responses received, including a final empty one
    pub pages_fetched: u32,
    pub exhausted: Option<FetchExhausted>,
}

/// Client for the paginated ingestion API
pub struct Fetcher {
    client: Client,
    url: String,
    api_key: String,
}

impl Fetcher {
    /// Build a fetcher; the configured timeout applies to every request
    pub fn new(config: &ApiConfig) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// Retrieve every record in `window`
    pub async fn fetch(
        &self,
        window: &TimeWindow,
        object_key: &str,
        page_size: u32,
        max_retries_per_page: u32,
    ) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();
        let mut page: u32 = 1;

        info!(%window, object_key, page_size, "Fetching records");

        loop {
            let mut last_error = None;
            let mut batch = None;

            for attempt in 1..=max_retries_per_page {
                debug!(page, attempt, max_retries = max_retries_per_page, "Requesting page");
                match self.fetch_page(window, object_key, page_size, page).await {
                    Ok(records) => {
                        batch = Some(records);
                        break;
                    },
                    Err(e) => {
                        warn!(
                            page,
                            attempt,
                            max_retries = max_retries_per_page,
                            error = %e,
                            "Page request failed"
                        );
                        last_error = Some(e);
                    },
                }
            }

            let Some(batch) = batch else {
                let exhausted = FetchExhausted {
                    page,
                    attempts: max_retries_per_page,
                    last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
                };
                warn!(
                    page,
                    attempts = exhausted.attempts,
                    kept = outcome.records.len(),
                    "Giving up on page, keeping records from earlier pages"
                );
                outcome.exhausted = Some(exhausted);
                return outcome;
            };

            outcome.pages_fetched += 1;
            let received = batch.len();

            if received == 0 {
                info!(page, total = outcome.records.len(), "No more data");
                break;
            }

            outcome.records.extend(batch);
            debug!(page, received, total = outcome.records.len(), "Page received");

            if received < page_size as usize {
                info!(page, total = outcome.records.len(), "Last page reached");
                break;
            }

            page += 1;
        }

        outcome
    }

    async fn fetch_page(
        &self,
        window: &TimeWindow,
        object_key: &str,
        page_size: u32,
        page: u32,
    ) -> Result<Vec<Record>, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("created_since", window.since_param()),
                ("created_to", window.to_param()),
                ("count", page_size.to_string()),
                ("page", page.to_string()),
            ])
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        extract_records(body, object_key)
    }
}

/// Pull the records array out of a page body; an absent key is an empty page
fn extract_records(body: Value, object_key: &str) -> Result<Vec<Record>, FetchError> {
    let Value::Object(mut body) = body else {
        return Err(FetchError::Malformed("response body is not a JSON object".into()));
    };

    match body.remove(object_key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(record) => Ok(record),
                other => Err(FetchError::Malformed(format!(
                    "element {i} of '{object_key}' is {}, expected an object",
                    json_kind(&other)
                ))),
            })
            .collect(),
        Some(other) => Err(FetchError::Malformed(format!(
            "'{object_key}' is {}, expected an array",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_records() {
        let records = extract_records(json!({"deals": [{"id": 1}, {"id": 2}]}), "deals").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["id"], json!(2));
    }

    #[test]
    fn test_missing_key_is_empty_page() {
        assert!(extract_records(json!({"tickets": []}), "deals").unwrap().is_empty());
        assert!(extract_records(json!({"deals": null}), "deals").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_pages() {
        assert!(matches!(
            extract_records(json!([1, 2]), "deals"),
            Err(FetchError::Malformed(_))
        ));
        assert!(matches!(
            extract_records(json!({"deals": "nope"}), "deals"),
            Err(FetchError::Malformed(_))
        ));
        let err = extract_records(json!({"deals": [{"id": 1}, 7]}), "deals").unwrap_err();
        assert!(err.to_string().contains("element 1"));
    }
}
