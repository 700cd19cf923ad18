//! Tests for whole-run orchestration
//!
//! A temporary project directory holds `config.yaml` and the `datasets/`
//! tree; the built-in `rapid_yahoo` catalog is served by a mock API.

use serde_json::json;
use serial_test::serial;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tdw_ingest::catalog::builtin_catalog;
use tdw_ingest::record::TableName;
use tdw_ingest::sink::MemorySink;
use tdw_ingest::{run_ingestion, IngestRequest};
use tempfile::TempDir;
use wiremock::{
    matchers::{header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

const API_KEY_VAR: &str = "RAPID_YAHOO_KEY";

const TICKERS_SCHEMA: &str = r#"
responsePath: body
pagination:
  enabled: true
  maxPages: 1
columns:
  - name: symbol
    type: string
  - name: name
    type: string
"#;

const HISTORY_SCHEMA: &str = r#"
responsePath: body
pagination: {enabled: false}
columns:
  - name: timestamp
    type: long
  - name: close
    type: float
"#;

/// Helper to lay out config.yaml and datasets/rapid_yahoo for a run
fn create_project(dir: &TempDir, base_url: &str, enabled: &[&str]) {
    let datasets = enabled
        .iter()
        .map(|name| format!("      {}:\n        enabled: true\n", name))
        .collect::<String>();
    fs::write(
        dir.path().join("config.yaml"),
        format!(
            "sources:\n  rapid_yahoo:\n    enabled: true\n    datasets:\n{}",
            datasets
        ),
    )
    .expect("write config.yaml");

    let source_dir = dir.path().join("datasets/rapid_yahoo");
    fs::create_dir_all(source_dir.join("schema")).expect("create datasets dir");
    fs::write(
        source_dir.join("config.yaml"),
        format!(
            "variables:\n  base_url: {}\n  timeout: 5\nheaders:\n  rapidapi:\n    x-rapidapi-key: '{{api_key}}'\n",
            base_url
        ),
    )
    .expect("write source config");
    fs::write(source_dir.join("schema/tickers.yaml"), TICKERS_SCHEMA).expect("write schema");
    fs::write(source_dir.join("schema/history_1d.yaml"), HISTORY_SCHEMA).expect("write schema");
}

fn request(dir: &Path, selector: &str) -> IngestRequest {
    IngestRequest::new(selector)
        .with_config_path(dir.join("config.yaml"))
        .with_datasets_dir(dir.join("datasets"))
}

async fn mount_yahoo(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v2/markets/tickers"))
        .and(query_param("type", "STOCKS"))
        .and(header("x-rapidapi-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "body": [
                {"symbol": "AAPL", "name": "Apple Inc."},
                {"symbol": "MSFT", "name": "Microsoft Corporation"},
                {"symbol": "AAPL", "name": "Apple Inc."}
            ]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/markets/stock/history"))
        .and(query_param("interval", "1d"))
        .and(header("x-rapidapi-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "body": [{"timestamp": 1704153600, "close": 185.64}]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
#[serial]
async fn test_run_ingests_dependency_before_dependent() {
    let server = MockServer::start().await;
    mount_yahoo(&server).await;

    let dir = TempDir::new().expect("tempdir");
    create_project(&dir, &server.uri(), &["tickers", "history_1d"]);

    std::env::set_var(API_KEY_VAR, "test-key");
    let sink = Arc::new(MemorySink::new());
    let result = run_ingestion(
        &request(dir.path(), "rapid_yahoo"),
        builtin_catalog(),
        sink.clone(),
    )
    .await;
    std::env::remove_var(API_KEY_VAR);

    let summary = result.expect("run should succeed");
    let tables: Vec<String> = summary.tables.iter().map(|(t, _)| t.qualified()).collect();
    assert_eq!(
        tables,
        vec!["bronze.rapid_yahoo_tickers", "bronze.rapid_yahoo_history_1d"]
    );

    let tickers = sink
        .table(&TableName::new("bronze", "rapid_yahoo", "tickers"))
        .await
        .expect("tickers written");
    assert_eq!(tickers.records.len(), 3);

    // two distinct symbols, one bar each
    let history = sink
        .table(&TableName::new("bronze", "rapid_yahoo", "history_1d"))
        .await
        .expect("history written");
    assert_eq!(history.records.len(), 2);
    assert!(history.schema.contains("symbol"));
    assert!(sink.is_closed());
}

#[tokio::test]
#[serial]
async fn test_selector_narrows_to_one_dataset() {
    let server = MockServer::start().await;
    mount_yahoo(&server).await;

    let dir = TempDir::new().expect("tempdir");
    create_project(&dir, &server.uri(), &["tickers", "history_1d"]);

    std::env::set_var(API_KEY_VAR, "test-key");
    let sink = Arc::new(MemorySink::new());
    let result = run_ingestion(
        &request(dir.path(), "rapid_yahoo.tickers"),
        builtin_catalog(),
        sink.clone(),
    )
    .await;
    std::env::remove_var(API_KEY_VAR);

    let summary = result.expect("run should succeed");
    assert_eq!(summary.tables.len(), 1);
    assert_eq!(sink.table_names().await, vec!["bronze.rapid_yahoo_tickers"]);
}

#[tokio::test]
#[serial]
async fn test_no_matching_sources_is_not_an_error() {
    let server = MockServer::start().await;

    let dir = TempDir::new().expect("tempdir");
    create_project(&dir, &server.uri(), &["tickers"]);

    let sink = Arc::new(MemorySink::new());
    let summary = run_ingestion(
        &request(dir.path(), "rapid_yahoo.history_1d"),
        builtin_catalog(),
        sink.clone(),
    )
    .await
    .expect("empty selection should succeed");

    assert!(summary.tables.is_empty());
    assert!(server.received_requests().await.expect("recording").is_empty());
    assert!(!sink.is_closed());
}

#[tokio::test]
#[serial]
async fn test_missing_api_key_fails_before_fetching() {
    let server = MockServer::start().await;
    mount_yahoo(&server).await;

    let dir = TempDir::new().expect("tempdir");
    create_project(&dir, &server.uri(), &["tickers"]);
    std::env::remove_var(API_KEY_VAR);

    let err = run_ingestion(
        &request(dir.path(), "rapid_yahoo"),
        builtin_catalog(),
        Arc::new(MemorySink::new()),
    )
    .await
    .expect_err("missing key must fail");

    assert!(err.is_configuration());
    assert!(err.to_string().contains(API_KEY_VAR));
    assert!(server.received_requests().await.expect("recording").is_empty());
}

#[tokio::test]
#[serial]
async fn test_dependent_without_dependency_table_fails() {
    let server = MockServer::start().await;
    mount_yahoo(&server).await;

    let dir = TempDir::new().expect("tempdir");
    create_project(&dir, &server.uri(), &["history_1d"]);

    std::env::set_var(API_KEY_VAR, "test-key");
    let result = run_ingestion(
        &request(dir.path(), "rapid_yahoo"),
        builtin_catalog(),
        Arc::new(MemorySink::new()),
    )
    .await;
    std::env::remove_var(API_KEY_VAR);

    let err = result.expect_err("dependency table is required");
    assert!(matches!(err, tdw_ingest::IngestError::TableNotFound(_)));
}
