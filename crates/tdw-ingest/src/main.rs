//! TDW - Trading data warehouse ingestion tool

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tdw_common::logging::{init_logging, LogConfig, LogLevel};
use tdw_ingest::catalog::builtin_catalog;
use tdw_ingest::config::{DatabaseConfig, DEFAULT_CONFIG_PATH, DEFAULT_DATASETS_DIR};
use tdw_ingest::runner::{execute_plan, plan_ingestion, IngestRequest};
use tdw_ingest::sink::{MemorySink, PostgresSink, TableSink};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "tdw")]
#[command(author, version, about = "Trading data warehouse ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Ingest API datasets into the configured layer
    Ingest {
        /// Dataset to ingest, `<source>` or `<source>.<dataset>`
        #[arg(short, long)]
        dataset: String,

        /// Run configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Directory with per-source configuration and schema descriptions
        #[arg(long, default_value = DEFAULT_DATASETS_DIR)]
        datasets_dir: PathBuf,

        /// Keep results in memory instead of writing to PostgreSQL
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv_override().ok();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("tdw")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Ingest {
            dataset,
            config,
            datasets_dir,
            dry_run,
        } => {
            let run_id = Uuid::new_v4();
            let request = IngestRequest::new(dataset)
                .with_config_path(config)
                .with_datasets_dir(datasets_dir);

            ingest(request, dry_run)
                .instrument(info_span!("run", %run_id))
                .await?;
        },
    }

    Ok(())
}

async fn ingest(request: IngestRequest, dry_run: bool) -> Result<()> {
    let plan = plan_ingestion(&request, builtin_catalog())?;

    if plan.is_empty() {
        warn!(selector = %request.selector, "No sources found for the specified dataset");
        return Ok(());
    }

    let sink: Arc<dyn TableSink> = if dry_run {
        info!("Dry run, results are kept in memory");
        Arc::new(MemorySink::new())
    } else {
        Arc::new(PostgresSink::connect(&DatabaseConfig::from_env()?).await?)
    };

    let summary = execute_plan(plan, sink).await?;

    for (table, rows) in &summary.tables {
        info!(table = %table, rows, "Ingested");
    }
    info!("Ingestion complete");
    Ok(())
}
