use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use channel_harvest::common::constants::{ENRICH_STAGE, LOAD_ENRICHMENT_STAGE, LOAD_RAW_STAGE, SCRAPE_STAGE};
use channel_harvest::config::{parse_channel_list, Config};
use channel_harvest::observability::{logging, metrics};
use channel_harvest::pipeline::warehouse::PartitionScope;
use channel_harvest::pipeline::{PipelineExecutionResult, PipelineOrchestrator, StageSelection};

#[derive(Parser)]
#[command(name = "channel_harvest")]
#[command(about = "Channel history scraper and warehouse loader")]
#[command(version)]
struct Cli {
    /// Path to the pipeline configuration file
    #[arg(long, global = true, default_value = "pipeline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch channel history into the landing store
    Scrape {
        /// Channels to fetch (comma-separated); overrides the configured list
        #[arg(long)]
        channels: Option<String>,
    },
    /// Load landing partitions into the warehouse
    Load {
        /// First partition date to load (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last partition date to load (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Only load these channels (comma-separated)
        #[arg(long)]
        channels: Option<String>,
    },
    /// Classify downloaded attachments
    Enrich,
    /// Load classification output into the warehouse
    LoadEnrichment,
    /// Run the full pipeline, or a selection of its stages
    Run {
        /// Only run these stages (comma-separated)
        #[arg(long)]
        only: Option<String>,
        /// Start at this stage
        #[arg(long)]
        from: Option<String>,
        /// Channels to fetch (comma-separated); overrides the configured list
        #[arg(long)]
        channels: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    logging::init_logging(&config.paths.log_dir);
    metrics::init_metrics();

    let mut load_scope = PartitionScope::all();
    let selection = match cli.command {
        Commands::Scrape { channels } => {
            override_channels(&mut config, channels);
            StageSelection::only(&[SCRAPE_STAGE])?
        }
        Commands::Load { from, to, channels } => {
            load_scope = PartitionScope {
                from,
                to,
                channels: channels.as_deref().map(parse_channel_list),
            };
            StageSelection::only(&[LOAD_RAW_STAGE])?
        }
        Commands::Enrich => StageSelection::only(&[ENRICH_STAGE])?,
        Commands::LoadEnrichment => StageSelection::only(&[LOAD_ENRICHMENT_STAGE])?,
        Commands::Run {
            only,
            from,
            channels,
        } => {
            override_channels(&mut config, channels);
            let only: Vec<String> = only
                .map(|list| list.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default();
            StageSelection::new(&only, from.as_deref())?
        }
    };
    config.validate()?;

    info!(stages = ?selection.stages(), "Starting channel_harvest");
    let orchestrator = PipelineOrchestrator::from_config(config)?.with_load_scope(load_scope);
    let result = orchestrator.run(&selection).await?;
    print_summary(&result);
    Ok(())
}

fn override_channels(config: &mut Config, channels: Option<String>) {
    if let Some(list) = channels {
        config.source.channels = parse_channel_list(&list);
    }
}

fn print_summary(result: &PipelineExecutionResult) {
    println!("\n📊 Pipeline run {}:", result.run_id);
    for (stage, step) in &result.stages {
        println!(
            "   {:<16} attempted {:>6}  succeeded {:>6}  skipped {:>6}  {}",
            stage, step.attempted, step.succeeded, step.skipped, step.message
        );
    }
    if let Some(duration) = result.duration() {
        println!("   Finished in {:.1}s", duration.num_milliseconds() as f64 / 1000.0);
    }
}
