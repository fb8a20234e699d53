//! BigQuery REST backend
//!
//! Talks to the `bigquery/v2` JSON API directly with `reqwest`:
//!
//! | operation       | endpoint                                          |
//! |-----------------|---------------------------------------------------|
//! | list tables     | `GET  datasets/{d}/tables` (paged)                |
//! | table schema    | `GET  datasets/{d}/tables/{t}`                    |
//! | delete table    | `DELETE datasets/{d}/tables/{t}` (404 = absent)   |
//! | load CSV        | `POST upload/.../jobs?uploadType=multipart`       |
//! | job status      | `GET  jobs/{id}`                                  |
//! | SQL             | `POST queries`, then `GET queries/{id}` until done |
//!
//! Load and query jobs are polled until BigQuery reports them finished.

use super::{MergeStatement, Result, TableRef, WarehouseBackend};
use crate::config::WarehouseConfig;
use crate::error::WarehouseError;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Page size for `tables.list`.
const LIST_PAGE_SIZE: u32 = 1000;

/// Server-side wait per `getQueryResults` call in milliseconds.
const QUERY_WAIT_MS: u64 = 10_000;

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableList {
    #[serde(default)]
    tables: Vec<TableListEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableListEntry {
    table_reference: TableReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableReference {
    table_id: String,
}

#[derive(Debug, Deserialize)]
struct TableResource {
    schema: Option<TableSchema>,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: JobReference,
    status: Option<JobStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    #[serde(default)]
    rows: Vec<QueryRow>,
}

#[derive(Debug, Deserialize)]
struct QueryRow {
    f: Vec<QueryCell>,
}

#[derive(Debug, Deserialize)]
struct QueryCell {
    v: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

// ============================================================================
// Backend
// ============================================================================

/// BigQuery backend authenticated with a bearer access token
pub struct BigQueryBackend {
    client: Client,
    base_url: String,
    project: String,
    access_token: String,
    location: Option<String>,
    poll_interval: Duration,
}

impl BigQueryBackend {
    pub fn new(config: &WarehouseConfig, access_token: impl Into<String>) -> Result<Self> {
        let client = Client::builder().build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            project: config.project.clone(),
            access_token: access_token.into(),
            location: config.location.clone(),
            poll_interval: config.poll_interval(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/bigquery/v2/projects/{}/{}", self.base_url, self.project, path)
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/bigquery/v2/projects/{}/jobs", self.base_url, self.project)
    }

    fn table_url(&self, table: &TableRef) -> String {
        self.api_url(&format!("datasets/{}/tables/{}", table.dataset, table.table))
    }

    fn new_job_reference(&self, kind: &str) -> Value {
        let mut reference = json!({
            "projectId": self.project,
            "jobId": format!("omnisync_{}_{}", kind, uuid::Uuid::new_v4().simple()),
        });
        if let Some(location) = &self.location {
            reference["location"] = json!(location);
        }
        reference
    }

    /// Poll `jobs.get` until the job is DONE
    async fn wait_for_job(&self, reference: &JobReference) -> Result<()> {
        loop {
            let mut request = self
                .client
                .get(self.api_url(&format!("jobs/{}", reference.job_id)))
                .bearer_auth(&self.access_token);
            if let Some(location) = &reference.location {
                request = request.query(&[("location", location)]);
            }
            let job: Job = check(request.send().await?).await?.json().await?;

            match job.status {
                Some(status) if status.state == "DONE" => {
                    return match status.error_result {
                        Some(error) => Err(WarehouseError::JobFailed {
                            job_id: job.job_reference.job_id,
                            message: format!("{}: {}", error.reason, error.message),
                        }),
                        None => Ok(()),
                    };
                },
                status => {
                    debug!(
                        job_id = %reference.job_id,
                        state = status.as_ref().map(|s| s.state.as_str()).unwrap_or("UNKNOWN"),
                        "Waiting for job"
                    );
                    tokio::time::sleep(self.poll_interval).await;
                },
            }
        }
    }

    /// Run a standard-SQL statement and wait for its result rows
    async fn run_query(&self, sql: &str) -> Result<Vec<QueryRow>> {
        let mut body = json!({
            "query": sql,
            "useLegacySql": false,
            "requestId": uuid::Uuid::new_v4().to_string(),
        });
        if let Some(location) = &self.location {
            body["location"] = json!(location);
        }

        let response = self
            .client
            .post(self.api_url("queries"))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        let mut result: QueryResponse = check(response).await?.json().await?;

        while !result.job_complete {
            let reference = result
                .job_reference
                .clone()
                .ok_or_else(|| WarehouseError::unexpected("incomplete query without job reference"))?;
            debug!(job_id = %reference.job_id, "Waiting for query");

            let mut request = self
                .client
                .get(self.api_url(&format!("queries/{}", reference.job_id)))
                .bearer_auth(&self.access_token)
                .query(&[("timeoutMs", QUERY_WAIT_MS.to_string())]);
            if let Some(location) = &reference.location {
                request = request.query(&[("location", location)]);
            }
            result = check(request.send().await?).await?.json().await?;

            if !result.job_complete {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        Ok(result.rows)
    }
}

/// Turn a non-2xx response into [`WarehouseError::Api`]
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|envelope| envelope.error.message)
        .unwrap_or(body);
    Err(WarehouseError::Api {
        status: status.as_u16(),
        message,
    })
}

/// `multipart/related` body carrying job metadata and the CSV payload
fn multipart_related(boundary: &str, metadata: &Value, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 512);
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{boundary}\r\nContent-Type: text/csv\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[async_trait]
impl WarehouseBackend for BigQueryBackend {
    async fn list_tables(&self, dataset: &str) -> Result<BTreeSet<String>> {
        let mut tables = BTreeSet::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(self.api_url(&format!("datasets/{dataset}/tables")))
                .bearer_auth(&self.access_token)
                .query(&[("maxResults", LIST_PAGE_SIZE.to_string())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let page: TableList = check(request.send().await?).await?.json().await?;
            tables.extend(page.tables.into_iter().map(|t| t.table_reference.table_id));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(tables)
    }

    async fn load_csv(&self, table: &TableRef, path: &Path) -> Result<()> {
        let data = tokio::fs::read(path).await?;
        let metadata = json!({
            "jobReference": self.new_job_reference("load"),
            "configuration": {
                "load": {
                    "destinationTable": {
                        "projectId": table.project,
                        "datasetId": table.dataset,
                        "tableId": table.table,
                    },
                    "sourceFormat": "CSV",
                    "skipLeadingRows": 1,
                    "autodetect": true,
                    "allowQuotedNewlines": true,
                    "writeDisposition": "WRITE_TRUNCATE",
                }
            }
        });

        let boundary = format!("omnisync_{}", uuid::Uuid::new_v4().simple());
        let response = self
            .client
            .post(self.upload_url())
            .query(&[("uploadType", "multipart")])
            .bearer_auth(&self.access_token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(multipart_related(&boundary, &metadata, &data))
            .send()
            .await?;

        let job: Job = check(response).await?.json().await?;
        info!(table = %table, job_id = %job.job_reference.job_id, bytes = data.len(), "Load job submitted");
        self.wait_for_job(&job.job_reference).await
    }

    async fn table_columns(&self, table: &TableRef) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.table_url(table))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(WarehouseError::NotFound(table.to_string()));
        }

        let resource: TableResource = check(response).await?.json().await?;
        Ok(resource
            .schema
            .map(|s| s.fields.into_iter().map(|f| f.name).collect())
            .unwrap_or_default())
    }

    async fn execute_merge(&self, statement: &MergeStatement) -> Result<()> {
        self.run_query(&statement.to_sql()).await.map(|_| ())
    }

    async fn count_rows(&self, table: &TableRef) -> Result<u64> {
        let rows = self
            .run_query(&format!("SELECT COUNT(*) AS cnt FROM {}", table.quoted()))
            .await?;

        let value = rows
            .first()
            .and_then(|row| row.f.first())
            .map(|cell| &cell.v)
            .ok_or_else(|| WarehouseError::unexpected(format!("empty COUNT(*) result for {table}")))?;

        match value {
            Value::String(s) => s.parse().map_err(|_| {
                WarehouseError::unexpected(format!("non-numeric COUNT(*) result '{s}' for {table}"))
            }),
            Value::Number(n) => n.as_u64().ok_or_else(|| {
                WarehouseError::unexpected(format!("non-numeric COUNT(*) result '{n}' for {table}"))
            }),
            other => Err(WarehouseError::unexpected(format!(
                "non-numeric COUNT(*) result '{other}' for {table}"
            ))),
        }
    }

    async fn delete_table(&self, table: &TableRef) -> Result<bool> {
        let response = self
            .client
            .delete(self.table_url(table))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(response).await?;
        Ok(true)
    }
}
