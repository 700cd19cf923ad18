//! Table storage backends
//!
//! The pipeline reads dependency tables from, and writes finished tables to,
//! a [`TableSink`]. Tables are always replaced wholesale.

mod memory;
mod postgres;

pub use memory::MemorySink;
pub use postgres::PostgresSink;

use crate::error::Result;
use crate::record::{Table, TableName};
use async_trait::async_trait;

/// Relational target for ingested tables
#[async_trait]
pub trait TableSink: Send + Sync {
    /// Create the namespace (schema) if it does not exist yet
    async fn ensure_namespace(&self, namespace: &str) -> Result<()>;

    /// Read a whole table back.
    ///
    /// Fails with [`IngestError::TableNotFound`](crate::error::IngestError::TableNotFound)
    /// when the relation does not exist.
    async fn read_table(&self, name: &TableName) -> Result<Table>;

    /// Replace the relation's schema and contents with `table`.
    ///
    /// The namespace must already exist.
    async fn overwrite_table(&self, table: &Table) -> Result<()>;

    /// Release connections. Further calls fail with a connection error.
    async fn close(&self) -> Result<()>;
}
