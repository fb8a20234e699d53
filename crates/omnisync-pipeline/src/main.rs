//! Omnisync - API to BigQuery sync tool

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use omnisync_common::logging::{init_logging, LogConfig, LogLevel};
use omnisync_common::TimeWindow;
use omnisync_pipeline::config::{ApiConfig, FetchConfig, NormalizeConfig, WarehouseConfig};
use omnisync_pipeline::fetch::Fetcher;
use omnisync_pipeline::normalize::Normalizer;
use omnisync_pipeline::pipeline::{Action, Pipeline, PipelineRequest, DEFAULT_MERGE_KEY};
use omnisync_pipeline::warehouse::bigquery::BigQueryBackend;
use omnisync_pipeline::warehouse::memory::InMemoryWarehouse;
use omnisync_pipeline::warehouse::{WarehouseBackend, WarehouseLoader};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "omnisync")]
#[command(author, version, about = "Sync API records into BigQuery")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a time window and load it into the warehouse
    Run {
        /// Window start, e.g. "2024-01-01" or "2024-01-01 00:00:00"
        #[arg(long)]
        since: String,

        /// Window end (inclusive)
        #[arg(long)]
        to: String,

        /// Key of the records array in each API page
        #[arg(long)]
        object_key: Option<String>,

        /// Records per page
        #[arg(long)]
        page_size: Option<u32>,

        /// Attempts per page before giving up
        #[arg(long)]
        max_retries: Option<u32>,

        /// Load into an in-process warehouse instead of BigQuery
        #[arg(long)]
        dry_run: bool,

        #[command(subcommand)]
        action: ActionCommand,
    },

    /// List tables in a dataset
    Tables {
        /// Dataset to list (defaults to BQ_DATASET)
        #[arg(long)]
        dataset: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ActionCommand {
    /// Create or replace a table with the fetched data
    New {
        #[arg(long)]
        table: String,
    },

    /// Upsert the fetched data into an existing table through a staging table
    Update {
        /// Existing table to merge into
        #[arg(long)]
        main: String,

        /// Scratch table, dropped after a successful merge
        #[arg(long)]
        staging: String,

        /// Join column
        #[arg(long, default_value = DEFAULT_MERGE_KEY)]
        key: String,
    },
}

impl From<ActionCommand> for Action {
    fn from(command: ActionCommand) -> Self {
        match command {
            ActionCommand::New { table } => Action::New { table },
            ActionCommand::Update { main, staging, key } => Action::Update {
                main_table: main,
                staging_table: staging,
                key_field: key,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("omnisync")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Run {
            since,
            to,
            object_key,
            page_size,
            max_retries,
            dry_run,
            action,
        } => {
            let mut fetch = FetchConfig::from_env()?;
            if let Some(object_key) = object_key {
                fetch.object_key = object_key;
            }
            if let Some(page_size) = page_size {
                fetch.page_size = page_size;
            }
            if let Some(max_retries) = max_retries {
                fetch.max_retries_per_page = max_retries;
            }
            fetch.validate()?;

            let request = PipelineRequest {
                window: TimeWindow::parse(&since, &to)?,
                object_key: fetch.object_key.clone(),
                action: action.into(),
            };

            if dry_run {
                if matches!(request.action, Action::Update { .. }) {
                    anyhow::bail!("--dry-run supports only the 'new' action");
                }
                let warehouse = WarehouseConfig::dry_run_from_env()?;
                info!("Dry run, loading into an in-process warehouse");
                run_pipeline(InMemoryWarehouse::new(), &warehouse, fetch, &request).await
            } else {
                let warehouse = WarehouseConfig::from_env()?;
                let backend = bigquery_backend(&warehouse)?;
                run_pipeline(backend, &warehouse, fetch, &request).await
            }
        },
        Command::Tables { dataset } => {
            let warehouse = WarehouseConfig::from_env()?;
            let loader = WarehouseLoader::new(bigquery_backend(&warehouse)?, &warehouse);
            let dataset = dataset.unwrap_or_else(|| warehouse.dataset.clone());

            let tables = loader
                .list_tables(&dataset)
                .await
                .with_context(|| format!("Failed to list tables in dataset '{dataset}'"))?;
            for table in tables {
                println!("{table}");
            }
            Ok(())
        },
    }
}

fn bigquery_backend(config: &WarehouseConfig) -> Result<BigQueryBackend> {
    let token = config
        .access_token
        .clone()
        .context("BQ_ACCESS_TOKEN must be set")?;
    Ok(BigQueryBackend::new(config, token)?)
}

async fn run_pipeline<B: WarehouseBackend>(
    backend: B,
    warehouse: &WarehouseConfig,
    fetch: FetchConfig,
    request: &PipelineRequest,
) -> Result<()> {
    let api = ApiConfig::from_env()?;
    let normalize = NormalizeConfig::from_env()?;

    let pipeline = Pipeline::new(
        Fetcher::new(&api)?,
        Normalizer::new(normalize.classification(), normalize.text_null),
        WarehouseLoader::new(backend, warehouse),
        fetch,
    );

    match pipeline.run(request).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        },
        Err(e) => {
            error!(stage = %e.stage(), error = %e, "Pipeline aborted");
            Err(e.into())
        },
    }
}
