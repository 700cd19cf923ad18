//! Run orchestration
//!
//! A run selects datasets from the catalog, binds credentials per source and
//! then ingests every selected dataset strictly in sequence against a single
//! shared sink. The first failing dataset aborts the run.

use crate::auth::ApiAuth;
use crate::catalog::{filter_datasets, filter_sources, SourceDescriptor};
use crate::config::{IngestSettings, RunConfig, DEFAULT_CONFIG_PATH, DEFAULT_DATASETS_DIR};
use crate::error::{IngestError, Result};
use crate::pipeline::{make_pipeline, Runtime};
use crate::record::TableName;
use crate::sink::TableSink;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

/// What to ingest and where configuration lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRequest {
    /// `<source>` or `<source>.<dataset>`
    pub selector: String,
    pub config_path: PathBuf,
    pub datasets_dir: PathBuf,
}

impl IngestRequest {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            datasets_dir: PathBuf::from(DEFAULT_DATASETS_DIR),
        }
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    pub fn with_datasets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.datasets_dir = dir.into();
        self
    }
}

/// Sources selected for a run, with credentials bound
#[derive(Debug, Clone)]
pub struct IngestionPlan {
    pub settings: IngestSettings,
    pub datasets_dir: PathBuf,
    pub sources: Vec<(SourceDescriptor, ApiAuth)>,
}

impl IngestionPlan {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn dataset_count(&self) -> usize {
        self.sources.iter().map(|(s, _)| s.datasets.len()).sum()
    }
}

/// Rows written per table, in ingestion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub tables: Vec<(TableName, usize)>,
}

impl RunSummary {
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|(_, rows)| rows).sum()
    }
}

/// Load configuration, select datasets and bind source credentials.
///
/// Nothing is fetched; every configuration problem surfaces here.
pub fn plan_ingestion(request: &IngestRequest, catalog: Vec<SourceDescriptor>) -> Result<IngestionPlan> {
    let config = RunConfig::load(&request.config_path)?;

    let sources = filter_sources(catalog, &config);
    let sources = filter_datasets(sources, &request.selector);

    let sources = sources
        .into_iter()
        .map(|source| {
            let auth = ApiAuth::from_env(&request.datasets_dir, &source.name)?;
            Ok((source, auth))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(IngestionPlan {
        settings: config.ingest,
        datasets_dir: request.datasets_dir.clone(),
        sources,
    })
}

/// Ingest every dataset of the plan, then close the sink.
pub async fn execute_plan(plan: IngestionPlan, sink: Arc<dyn TableSink>) -> Result<RunSummary> {
    let runtime = Runtime::new(Arc::clone(&sink), plan.settings, plan.datasets_dir);
    let mut summary = RunSummary::default();

    for (source, auth) in &plan.sources {
        for dataset in &source.datasets {
            let span = info_span!("dataset", source = %source.name, dataset = %dataset.name);

            async {
                info!("Ingesting {}.{}", source.name, dataset.name);
                let mut pipeline = make_pipeline(source, dataset, auth, &runtime)?;
                let rows = pipeline.run().await?;
                summary.tables.push((pipeline.table_name(), rows));
                Ok::<_, IngestError>(())
            }
            .instrument(span)
            .await?;
        }
    }

    sink.close().await?;

    info!(
        tables = summary.tables.len(),
        rows = summary.total_rows(),
        "Ingestion run complete"
    );
    Ok(summary)
}

/// Plan and execute a run. An empty selection is not an error.
pub async fn run_ingestion(
    request: &IngestRequest,
    catalog: Vec<SourceDescriptor>,
    sink: Arc<dyn TableSink>,
) -> Result<RunSummary> {
    let plan = plan_ingestion(request, catalog)?;

    if plan.is_empty() {
        warn!(selector = %request.selector, "No sources found for the specified dataset");
        return Ok(RunSummary::default());
    }

    info!(
        sources = plan.sources.len(),
        datasets = plan.dataset_count(),
        "Starting ingestion"
    );
    execute_plan(plan, sink).await
}
