//! Per-dataset ingestion pipeline
//!
//! ```text
//! read()    dependency table -> parameter sets -> pages -> records -> Table
//! process() Table -> Table + _rowHash + _processedTimestamp
//! write()   ensure layer namespace, overwrite <layer>.<source>_<dataset>
//! ```
//!
//! Stages must run in order; calling one out of order is a state error.

use crate::auth::ApiAuth;
use crate::catalog::{DatasetDescriptor, PipelineKind, SourceDescriptor};
use crate::config::{schema_path, IngestSettings};
use crate::enrich::Enricher;
use crate::error::{IngestError, Result};
use crate::fetch::{HttpSettings, PaginatingFetcher};
use crate::params::{cap_parameter_sets, expand};
use crate::record::{Table, TableName};
use crate::schema::{Column, ColumnType, Schema, SchemaDescription};
use crate::sink::TableSink;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Process-wide state shared by every pipeline of a run
#[derive(Clone)]
pub struct Runtime {
    pub sink: Arc<dyn TableSink>,
    pub settings: IngestSettings,
    /// Directory holding `<source>/config.yaml` and `<source>/schema/*.yaml`
    pub datasets_dir: PathBuf,
}

impl Runtime {
    pub fn new(sink: Arc<dyn TableSink>, settings: IngestSettings, datasets_dir: impl Into<PathBuf>) -> Self {
        Self {
            sink,
            settings,
            datasets_dir: datasets_dir.into(),
        }
    }
}

#[derive(Debug)]
enum Stage {
    Ready,
    Read(Table),
    Processed(Table),
    Written { rows: usize },
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Ready => "ready",
            Stage::Read(_) => "read",
            Stage::Processed(_) => "processed",
            Stage::Written { .. } => "written",
        }
    }
}

/// Read, process and write one dataset of one source
pub struct IngestionPipeline {
    source: String,
    dataset: DatasetDescriptor,
    description: SchemaDescription,
    schema: Schema,
    http: HttpSettings,
    sink: Arc<dyn TableSink>,
    settings: IngestSettings,
    enricher: Enricher,
    stage: Stage,
}

impl IngestionPipeline {
    /// Build a pipeline around an already parsed schema description.
    pub fn new(
        source: impl Into<String>,
        dataset: DatasetDescriptor,
        description: SchemaDescription,
        http: HttpSettings,
        runtime: &Runtime,
    ) -> Self {
        let source = source.into();
        let schema = description.schema();

        if dataset.pagination != description.pagination.enabled {
            debug!(
                source = %source,
                dataset = %dataset.name,
                pagination = description.pagination.enabled,
                "Schema description overrides catalog pagination flag"
            );
        }

        Self {
            source,
            dataset,
            description,
            schema,
            http,
            sink: Arc::clone(&runtime.sink),
            settings: runtime.settings.clone(),
            enricher: Enricher::default(),
            stage: Stage::Ready,
        }
    }

    pub fn with_enricher(mut self, enricher: Enricher) -> Self {
        self.enricher = enricher;
        self
    }

    /// Destination table name
    pub fn table_name(&self) -> TableName {
        TableName::new(&self.settings.layer, &self.source, &self.dataset.name)
    }

    /// Schema derived from the description, before any injected columns
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Table held by the current stage, if any
    pub fn table(&self) -> Option<&Table> {
        match &self.stage {
            Stage::Read(table) | Stage::Processed(table) => Some(table),
            Stage::Ready | Stage::Written { .. } => None,
        }
    }

    /// Fetch the dataset into a fresh in-memory table.
    pub async fn read(&mut self) -> Result<&mut Self> {
        let dependency = match &self.dataset.dependency {
            Some(dependency) => {
                let name = TableName::new(&self.settings.layer, &self.source, dependency);
                debug!(dependency = %name, "Reading dependency table");
                Some(self.sink.read_table(&name).await?)
            },
            None => None,
        };

        let sets = expand(&self.dataset.query_params, dependency.as_ref())?;
        let sets = cap_parameter_sets(sets, self.settings.max_parameter_sets);

        let fetcher = PaginatingFetcher::new(
            &self.http,
            &self.dataset.endpoint,
            &self.description.response_path,
            self.description.pagination,
        )?;
        let records = fetcher.fetch_all(&sets).await?;

        let mut schema = self.schema.clone();
        if let (Some(dependency), Some(first)) = (&dependency, sets.first()) {
            for (column, _) in first.bindings() {
                let data_type = dependency
                    .schema
                    .column(column)
                    .map(|c| c.data_type.clone())
                    .unwrap_or(ColumnType::String);
                schema = schema.with_column(Column::new(column.clone(), data_type));
            }
        }

        let table = Table::materialize(self.table_name(), schema, records)?;
        info!(table = %table.name, rows = table.len(), "Read dataset");

        self.stage = Stage::Read(table);
        Ok(self)
    }

    /// Enrich the table produced by [`read`](Self::read).
    pub fn process(&mut self) -> Result<&mut Self> {
        let table = match std::mem::replace(&mut self.stage, Stage::Ready) {
            Stage::Read(table) => table,
            other => {
                let err = self.out_of_order("process", &other);
                self.stage = other;
                return Err(err);
            },
        };

        if table.is_empty() {
            warn!(table = %table.name, "No rows fetched, table will be written empty");
        }

        self.stage = Stage::Processed(self.enricher.enrich(table));
        Ok(self)
    }

    /// Overwrite the destination table with the processed rows.
    pub async fn write(&mut self) -> Result<&mut Self> {
        let Stage::Processed(table) = &self.stage else {
            return Err(self.out_of_order("write", &self.stage));
        };

        self.sink.ensure_namespace(&table.name.layer).await?;
        self.sink.overwrite_table(table).await?;

        let rows = table.len();
        info!(table = %table.name, rows, "Wrote dataset");

        self.stage = Stage::Written { rows };
        Ok(self)
    }

    /// Run all three stages, returning the number of rows written.
    pub async fn run(&mut self) -> Result<usize> {
        self.read().await?.process()?.write().await?;
        Ok(self.rows_written().unwrap_or_default())
    }

    /// Rows written by the last successful [`write`](Self::write)
    pub fn rows_written(&self) -> Option<usize> {
        match self.stage {
            Stage::Written { rows } => Some(rows),
            _ => None,
        }
    }

    fn out_of_order(&self, operation: &str, stage: &Stage) -> IngestError {
        IngestError::State(format!(
            "cannot {} {} while pipeline is {}",
            operation,
            self.table_name(),
            stage.name()
        ))
    }
}

/// Build the pipeline for one dataset of a source.
///
/// Loads `<datasets_dir>/<source>/schema/<dataset>.yaml` and resolves the
/// source's HTTP settings; both fail before anything is fetched.
pub fn make_pipeline(
    source: &SourceDescriptor,
    dataset: &DatasetDescriptor,
    auth: &ApiAuth,
    runtime: &Runtime,
) -> Result<IngestionPipeline> {
    match source.kind {
        PipelineKind::RestApi => {
            let description =
                SchemaDescription::load(schema_path(&runtime.datasets_dir, &source.name, &dataset.name))?;
            let http = auth.http_settings(&source.header_set)?;

            Ok(IngestionPipeline::new(
                source.name.clone(),
                dataset.clone(),
                description,
                http,
                runtime,
            ))
        },
    }
}
