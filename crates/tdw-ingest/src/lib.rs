//! TDW Ingest Library
//!
//! Ingests paginated, dependency-chained REST API data into the warehouse.
//!
//! Each dataset is described by a YAML schema description. A pipeline per
//! dataset reads the dependency table (if any), expands query parameter
//! templates against it, fetches every page, materializes a typed table,
//! enriches it with a row hash and processing timestamp and overwrites the
//! destination table.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tdw_ingest::catalog::builtin_catalog;
//! use tdw_ingest::runner::{run_ingestion, IngestRequest};
//! use tdw_ingest::sink::MemorySink;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let request = IngestRequest::new("rapid_yahoo.tickers");
//!     let summary = run_ingestion(&request, builtin_catalog(), Arc::new(MemorySink::new())).await?;
//!     println!("{} rows", summary.total_rows());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod auth;
pub mod catalog;
pub mod config;
pub mod enrich;
pub mod error;
pub mod fetch;
pub mod normalize;
pub mod params;
pub mod pipeline;
pub mod record;
pub mod runner;
pub mod schema;
pub mod sink;

pub use error::{IngestError, Result};
pub use pipeline::{make_pipeline, IngestionPipeline, Runtime};
pub use runner::{run_ingestion, IngestRequest, RunSummary};
