//! Radar composite pipeline.
//!
//! Runs one batch pass over the configured sources, or maintains the
//! artifact cache.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use radar_pipeline::logging::{init_tracing, LogFormat};
use radar_pipeline::{Pipeline, PipelineConfig, ServiceContext};

#[derive(Parser, Debug)]
#[command(name = "radar-pipeline")]
#[command(about = "Fetch, reproject, cache and merge radar composites")]
struct Cli {
    /// Pipeline configuration file
    #[arg(long, env = "RADAR_CONFIG", default_value = "config/pipeline.yaml")]
    config: PathBuf,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one pipeline pass and print its summary
    Run {
        /// Restrict the run to these sources (repeatable)
        #[arg(short, long = "source")]
        sources: Vec<String>,
    },

    /// Maintain the artifact cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Remove expired entries locally and on the mirror
    Cleanup,
    /// Remove local entries, for all sources or one
    Clear {
        #[arg(short, long)]
        source: Option<String>,
    },
    /// Print entry counts and sizes per source
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format)?;

    let config = PipelineConfig::load(&cli.config)?;
    let ctx = ServiceContext::from_config(config).await?;

    match cli.command {
        Commands::Run { sources } => {
            let mut pipeline = Pipeline::from_context(ctx)?;
            pipeline.retain_sources(&sources);
            anyhow::ensure!(
                !pipeline.source_names().is_empty(),
                "No enabled source matches {:?}",
                sources
            );

            let summary = pipeline.run_once().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);

            if summary.is_total_failure() {
                anyhow::bail!("Every source failed");
            }
        }
        Commands::Cache { action } => match action {
            CacheAction::Cleanup => {
                let report = ctx.cache.cleanup_expired().await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            CacheAction::Clear { source } => {
                let removed = match &source {
                    Some(source) => ctx.cache.clear_source(source).await?,
                    None => ctx.cache.clear().await?,
                };
                info!(removed, source = ?source, "Cache cleared");
                println!("{}", serde_json::json!({ "removed": removed }));
            }
            CacheAction::Stats => {
                let stats = ctx.cache.stats().await?;
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
        },
    }

    Ok(())
}
