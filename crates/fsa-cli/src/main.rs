use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fsa_sync::IngestConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fsa-cli")]
#[command(about = "FSA prosecution outcomes ingest")]
struct Cli {
    /// SQLite database file; overrides FSA_DATABASE_PATH.
    #[arg(long, global = true)]
    database: Option<PathBuf>,
    /// Read a local workbook instead of downloading the published one.
    #[arg(long, global = true)]
    input: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch, dedup, geocode and persist new prosecution notices.
    Run,
    /// Create the record table and key index.
    Migrate,
    /// Print normalized records as JSON without geocoding or persisting.
    Preview {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Run the ingest on FSA_SCHEDULE_CRON until interrupted.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = IngestConfig::from_env()?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    info!(key_column = %config.key_column, database = %config.database_path.display(), "configured");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let summary = fsa_sync::run_ingest_once(&config, cli.input).await?;
            println!(
                "ingest complete: run_id={} found={} new={} persisted={} geocode_lookups={} cache_hits={}",
                summary.run_id,
                summary.found,
                summary.new_records,
                summary.persisted,
                summary.geocode.lookups,
                summary.geocode.cache_hits
            );
        }
        Commands::Migrate => {
            fsa_sync::migrate(&config).await?;
            println!("schema ready: {}", config.database_path.display());
        }
        Commands::Preview { limit } => {
            let records = fsa_sync::preview_records(&config, cli.input).await?;
            let shown = &records[..limit.min(records.len())];
            println!(
                "{}",
                serde_json::to_string_pretty(shown).context("serializing records")?
            );
            eprintln!("{} of {} records shown", shown.len(), records.len());
        }
        Commands::Schedule => {
            let cron = config.schedule_cron.clone();
            let sched = fsa_sync::build_scheduler(config, cli.input).await?;
            sched.start().await.context("starting scheduler")?;
            info!(%cron, "scheduler started");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for ctrl-c")?;
            info!("shutting down");
        }
    }

    Ok(())
}
