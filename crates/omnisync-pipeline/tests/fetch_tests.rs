//! Integration tests for paginated fetching
//!
//! These tests run the fetcher against a mock ingestion API and cover:
//! - Page termination (short page, empty page)
//! - Per-page retry bounds and partial results
//! - Request shape (auth header, window parameters)

#![allow(clippy::unwrap_used, clippy::expect_used)]

use omnisync_common::TimeWindow;
use omnisync_pipeline::config::ApiConfig;
use omnisync_pipeline::fetch::Fetcher;
use serde_json::{json, Value};
use wiremock::{
    matchers::{header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn fetcher(server: &MockServer) -> Fetcher {
    Fetcher::new(&ApiConfig {
        url: format!("{}/api/v1/deals", server.uri()),
        api_key: "secret".to_string(),
        timeout_secs: 5,
    })
    .unwrap()
}

fn window() -> TimeWindow {
    TimeWindow::parse("2024-01-01", "2024-01-31 23:59:59").unwrap()
}

/// A page body with `count` deals numbered from `first_id`
fn deals_page(first_id: u64, count: u64) -> Value {
    let deals: Vec<Value> = (first_id..first_id + count)
        .map(|id| json!({ "id": id, "title": format!("Deal {id}") }))
        .collect();
    json!({ "deals": deals })
}

async fn mount_page(server: &MockServer, page: u32, body: Value) {
    Mock::given(method("GET"))
        .and(path("/api/v1/deals"))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

// ============================================================================
// Pagination
// ============================================================================

#[tokio::test]
async fn test_short_page_ends_fetch() {
    let server = MockServer::start().await;
    mount_page(&server, 1, deals_page(1, 2)).await;
    mount_page(&server, 2, deals_page(3, 2)).await;
    mount_page(&server, 3, deals_page(5, 1)).await;

    let outcome = fetcher(&server).fetch(&window(), "deals", 2, 3).await;

    assert_eq!(outcome.records.len(), 5);
    assert_eq!(outcome.pages_fetched, 3);
    assert!(outcome.exhausted.is_none());

    let ids: Vec<u64> = outcome
        .records
        .iter()
        .map(|r| r["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_empty_page_ends_fetch() {
    let server = MockServer::start().await;
    mount_page(&server, 1, deals_page(1, 2)).await;
    mount_page(&server, 2, json!({ "deals": [] })).await;

    let outcome = fetcher(&server).fetch(&window(), "deals", 2, 3).await;

    assert_eq!(outcome.records.len(), 2);
    assert_eq!(outcome.pages_fetched, 2);
    assert!(outcome.exhausted.is_none());
}

#[tokio::test]
async fn test_empty_first_page() {
    let server = MockServer::start().await;
    mount_page(&server, 1, json!({ "deals": [] })).await;

    let outcome = fetcher(&server).fetch(&window(), "deals", 500, 3).await;

    assert!(outcome.records.is_empty());
    assert_eq!(outcome.pages_fetched, 1);
    assert!(outcome.exhausted.is_none());
}

#[tokio::test]
async fn test_missing_object_key_is_empty_page() {
    let server = MockServer::start().await;
    mount_page(&server, 1, json!({ "total": 0 })).await;

    let outcome = fetcher(&server).fetch(&window(), "deals", 500, 3).await;

    assert!(outcome.records.is_empty());
    assert!(outcome.exhausted.is_none());
}

#[tokio::test]
async fn test_custom_object_key() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        1,
        json!({ "leads": [{ "id": 7, "name": "Lan" }], "deals": [{ "id": 1 }] }),
    )
    .await;

    let outcome = fetcher(&server).fetch(&window(), "leads", 500, 3).await;

    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0]["name"], "Lan");
}

// ============================================================================
// Retries
// ============================================================================

#[tokio::test]
async fn test_exhausted_page_keeps_earlier_records() {
    let server = MockServer::start().await;
    mount_page(&server, 1, deals_page(1, 2)).await;

    Mock::given(method("GET"))
        .and(path("/api/v1/deals"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let outcome = fetcher(&server).fetch(&window(), "deals", 2, 3).await;

    assert_eq!(outcome.records.len(), 2);
    assert_eq!(outcome.pages_fetched, 1);

    let exhausted = outcome.exhausted.expect("fetch should report the failing page");
    assert_eq!(exhausted.page, 2);
    assert_eq!(exhausted.attempts, 3);
    assert!(exhausted.last_error.contains("500"));
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = MockServer::start().await;

    // First attempt fails, the mock then falls through to the healthy one.
    Mock::given(method("GET"))
        .and(path("/api/v1/deals"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_page(&server, 1, deals_page(1, 1)).await;

    let outcome = fetcher(&server).fetch(&window(), "deals", 2, 3).await;

    assert_eq!(outcome.records.len(), 1);
    assert!(outcome.exhausted.is_none());
}

#[tokio::test]
async fn test_malformed_page_counts_as_failed_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/deals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "deals": "oops" })))
        .expect(2)
        .mount(&server)
        .await;

    let outcome = fetcher(&server).fetch(&window(), "deals", 500, 2).await;

    assert!(outcome.records.is_empty());
    let exhausted = outcome.exhausted.unwrap();
    assert_eq!(exhausted.page, 1);
    assert!(exhausted.last_error.contains("expected an array"));
}

// ============================================================================
// Request Shape
// ============================================================================

#[tokio::test]
async fn test_request_parameters_and_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/deals"))
        .and(header("authorization", "Bearer secret"))
        .and(query_param("created_since", "2024-01-01T00:00:00Z"))
        .and(query_param("created_to", "2024-01-31T23:59:59Z"))
        .and(query_param("count", "500"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "deals": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = fetcher(&server).fetch(&window(), "deals", 500, 1).await;
    assert!(outcome.exhausted.is_none());
}
