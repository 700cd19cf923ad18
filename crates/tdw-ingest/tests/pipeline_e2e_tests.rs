//! End-to-end tests for a single dataset pipeline
//!
//! Each test runs read -> process -> write against a mock API and an
//! in-memory sink:
//! - Unpaginated fetch and enrichment
//! - Pagination terminating on an empty page
//! - Dependency expansion under the parameter set cap

use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tdw_ingest::catalog::DatasetDescriptor;
use tdw_ingest::config::IngestSettings;
use tdw_ingest::enrich::{PROCESSED_TIMESTAMP_COLUMN, ROW_HASH_COLUMN};
use tdw_ingest::fetch::HttpSettings;
use tdw_ingest::params::QueryTemplate;
use tdw_ingest::record::{Record, Table, TableName};
use tdw_ingest::schema::{Column, ColumnType, Schema, SchemaDescription};
use tdw_ingest::sink::MemorySink;
use tdw_ingest::{IngestionPipeline, Runtime};
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

/// Helper to build a schema description for `symbol`/`price` rows
fn quotes_description(pagination: &str) -> SchemaDescription {
    let yaml = format!(
        r#"
responsePath: data
pagination: {}
columns:
  - name: symbol
    type: string
  - name: price
    type: float
"#,
        pagination
    );
    SchemaDescription::parse(&yaml).expect("valid schema description")
}

fn pipeline(
    server: &MockServer,
    sink: &Arc<MemorySink>,
    dataset: DatasetDescriptor,
    description: SchemaDescription,
) -> IngestionPipeline {
    let runtime = Runtime::new(sink.clone(), IngestSettings::default(), "datasets");
    IngestionPipeline::new(
        "rapid_yahoo",
        dataset,
        description,
        HttpSettings::new(server.uri()),
        &runtime,
    )
}

/// Helper to seed a tickers dependency table
async fn seed_tickers(sink: &MemorySink, symbols: &[&str]) {
    let records = symbols
        .iter()
        .map(|symbol| {
            let mut record = Record::new();
            record.insert("symbol".to_string(), json!(symbol));
            record
        })
        .collect();

    sink.insert_table(Table {
        name: TableName::new("bronze", "rapid_yahoo", "tickers"),
        schema: Schema::new(vec![Column::new("symbol", ColumnType::String)]),
        records,
    })
    .await;
}

#[tokio::test]
async fn test_single_page_rows_are_enriched_and_written() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/quotes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"symbol": "AAPL", "price": 1.0}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let sink = Arc::new(MemorySink::new());
    let mut pipeline = pipeline(
        &server,
        &sink,
        DatasetDescriptor::new("quotes", "v1/quotes"),
        quotes_description("{enabled: false}"),
    );

    let rows = pipeline.run().await.expect("pipeline should succeed");
    assert_eq!(rows, 1);

    let table = sink
        .table(&TableName::new("bronze", "rapid_yahoo", "quotes"))
        .await
        .expect("table written");

    assert_eq!(table.records.len(), 1);
    let row = &table.records[0];
    assert_eq!(row["symbol"], json!("AAPL"));
    assert_eq!(row["price"], json!(1.0));

    let hash = row[ROW_HASH_COLUMN].as_str().expect("hash is a string");
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(row[PROCESSED_TIMESTAMP_COLUMN].is_string());
}

#[tokio::test]
async fn test_pagination_stops_at_first_empty_page() {
    let server = MockServer::start().await;

    for (page, body) in [
        ("1", json!({"data": [{"symbol": "AAPL", "price": 1.0}]})),
        ("2", json!({"data": [{"symbol": "MSFT", "price": 2.0}]})),
        ("3", json!({"data": []})),
    ] {
        Mock::given(method("GET"))
            .and(path("/v1/quotes"))
            .and(query_param("page", page))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&server)
            .await;
    }

    let sink = Arc::new(MemorySink::new());
    let mut pipeline = pipeline(
        &server,
        &sink,
        DatasetDescriptor::new("quotes", "v1/quotes").with_pagination(true),
        quotes_description("{enabled: true}"),
    );

    let rows = pipeline.run().await.expect("pipeline should succeed");

    assert_eq!(rows, 2);
    assert_eq!(server.received_requests().await.expect("recording").len(), 3);
}

#[tokio::test]
async fn test_dependency_expansion_is_capped_at_two_parameter_sets() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"price": 10.0}]
        })))
        .mount(&server)
        .await;

    let sink = Arc::new(MemorySink::new());
    seed_tickers(&sink, &["AAPL", "MSFT", "GOOG"]).await;

    let dataset = DatasetDescriptor::new("history_1d", "v1/history")
        .with_dependency("tickers")
        .with_query_params(QueryTemplate::from_pairs([("symbol", "{symbol}")]));

    let mut pipeline = pipeline(&server, &sink, dataset, quotes_description("{enabled: false}"));
    let rows = pipeline.run().await.expect("pipeline should succeed");

    let requested: Vec<String> = server
        .received_requests()
        .await
        .expect("recording")
        .iter()
        .filter_map(|request| {
            request
                .url
                .query_pairs()
                .find(|(key, _)| key == "symbol")
                .map(|(_, value)| value.into_owned())
        })
        .collect();

    let distinct: HashSet<&str> = requested.iter().map(String::as_str).collect();
    let universe = HashSet::from(["AAPL", "MSFT", "GOOG"]);

    assert_eq!(requested.len(), 2);
    assert_eq!(distinct.len(), 2);
    assert!(distinct.is_subset(&universe));

    // the bound symbol is materialized on every fetched row
    assert_eq!(rows, 2);
    let table = sink
        .table(&TableName::new("bronze", "rapid_yahoo", "history_1d"))
        .await
        .expect("table written");
    let written: HashSet<&str> = table
        .records
        .iter()
        .map(|r| r["symbol"].as_str().expect("symbol"))
        .collect();
    assert_eq!(written, distinct);
}

#[tokio::test]
async fn test_uncapped_expansion_fetches_every_distinct_value() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"price": 1.0}]})))
        .mount(&server)
        .await;

    let sink = Arc::new(MemorySink::new());
    seed_tickers(&sink, &["AAPL", "MSFT", "GOOG", "AAPL"]).await;

    let settings = IngestSettings {
        max_parameter_sets: None,
        ..IngestSettings::default()
    };
    let runtime = Runtime::new(sink.clone(), settings, "datasets");
    let dataset = DatasetDescriptor::new("history_1d", "v1/history")
        .with_dependency("tickers")
        .with_query_params(QueryTemplate::from_pairs([("symbol", "{symbol}")]));

    let mut pipeline = IngestionPipeline::new(
        "rapid_yahoo",
        dataset,
        quotes_description("{enabled: false}"),
        HttpSettings::new(server.uri()),
        &runtime,
    );

    assert_eq!(pipeline.run().await.expect("pipeline should succeed"), 3);
    assert_eq!(server.received_requests().await.expect("recording").len(), 3);
}

#[tokio::test]
async fn test_failed_fetch_leaves_previous_table_untouched() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let sink = Arc::new(MemorySink::new());
    let previous = Table {
        name: TableName::new("bronze", "rapid_yahoo", "quotes"),
        schema: Schema::new(vec![Column::new("symbol", ColumnType::String)]),
        records: vec![json!({"symbol": "OLD"}).as_object().cloned().expect("object")],
    };
    sink.insert_table(previous.clone()).await;

    let mut pipeline = pipeline(
        &server,
        &sink,
        DatasetDescriptor::new("quotes", "v1/quotes"),
        quotes_description("{enabled: false}"),
    );

    let err = pipeline.run().await.expect_err("fetch must fail");
    assert!(err.to_string().contains("500"));
    assert_eq!(sink.table(&previous.name).await, Some(previous));
}
