use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use solescan_store::Store;
use solescan_sync::{IngestConfig, IngestPipeline};

#[derive(Debug, Parser)]
#[command(name = "solescan")]
#[command(about = "Sneaker secondary-market scanner")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one bounded ingestion pass (and the scheduler, when enabled).
    Ingest,
    /// Build the metrics document and chart images from the store.
    Report {
        /// Directory for the report document and chart images.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Create or upgrade the local store schema.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = IngestConfig::from_env();

    match cli.command.unwrap_or(Commands::Ingest) {
        Commands::Ingest => {
            let pipeline = Arc::new(IngestPipeline::new(config).await?);
            let summary = pipeline.run_once().await?;
            println!(
                "ingest complete: run_id={} term=\"{}\" products={} market_rows={} secondary_rows={}",
                summary.run_id,
                summary.term,
                summary.products_ingested,
                summary.market_rows,
                summary.secondary_stats_rows + summary.secondary_ask_rows
            );

            if let Some(scheduler) = pipeline.maybe_build_scheduler().await? {
                scheduler.start().await.context("starting scheduler")?;
                info!("scheduler running; press ctrl-c to stop");
                tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            }
        }
        Commands::Report { out_dir } => {
            let store = Store::open(&config.database_path).await?;
            let report = solescan_report::build_metrics(&store).await?;
            let path = solescan_report::write_metrics_file(&report, &out_dir)?;
            let charts = solescan_report::charts::render_charts(&report, &out_dir)?;
            println!(
                "report complete: metrics={} charts={} joined_samples={}",
                path.display(),
                charts.len(),
                report.cross_source_samples.len()
            );
        }
        Commands::Migrate => {
            let store = Store::open(&config.database_path).await?;
            let products = store.product_count().await?;
            println!(
                "store ready at {} ({} products)",
                config.database_path.display(),
                products
            );
        }
    }

    Ok(())
}
