//! In-process sink used for dry runs and tests

use super::TableSink;
use crate::error::{IngestError, Result};
use crate::record::{Table, TableName};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Default)]
struct State {
    namespaces: HashSet<String>,
    tables: HashMap<String, Table>,
}

/// Keeps tables in memory, keyed by qualified name
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<State>,
    closed: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a table, creating its namespace.
    pub async fn insert_table(&self, table: Table) {
        let mut state = self.state.lock().await;
        state.namespaces.insert(table.name.layer.clone());
        state.tables.insert(table.name.qualified(), table);
    }

    /// Snapshot of a stored table
    pub async fn table(&self, name: &TableName) -> Option<Table> {
        self.state.lock().await.tables.get(&name.qualified()).cloned()
    }

    pub async fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().await.tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn has_namespace(&self, namespace: &str) -> bool {
        self.state.lock().await.namespaces.contains(namespace)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(IngestError::Connection("memory sink is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TableSink for MemorySink {
    async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        self.check_open()?;
        self.state.lock().await.namespaces.insert(namespace.to_string());
        Ok(())
    }

    async fn read_table(&self, name: &TableName) -> Result<Table> {
        self.check_open()?;
        self.state
            .lock()
            .await
            .tables
            .get(&name.qualified())
            .cloned()
            .ok_or_else(|| IngestError::TableNotFound(name.qualified()))
    }

    async fn overwrite_table(&self, table: &Table) -> Result<()> {
        self.check_open()?;
        let mut state = self.state.lock().await;

        if !state.namespaces.contains(&table.name.layer) {
            return Err(IngestError::sink(format!(
                "schema \"{}\" does not exist",
                table.name.layer
            )));
        }

        debug!(table = %table.name, rows = table.len(), "Overwriting in-memory table");
        state.tables.insert(table.name.qualified(), table.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
