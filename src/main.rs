use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, process::ExitCode};
use sustainlake::{
    config::PipelineConfig,
    pipeline::{run_analytics, run_transform},
    store::{inspect::inspect_dataset, ProcessedStore},
    PipelineError,
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Raw-to-processed sustainability metrics pipeline
#[derive(Parser, Debug)]
#[command(name = "sustainlake", version, about, long_about = None)]
struct Cli {
    /// Data directory holding raw/ and processed/ (overrides the config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Normalize, deduplicate and publish the latest raw ingestion of a dataset
    Transform {
        #[arg(short, long)]
        dataset: String,
    },
    /// Run the metric queries over the processed layer
    Analytics {
        /// Datasets to load (default: every processed dataset)
        #[arg(short, long)]
        dataset: Vec<String>,
    },
    /// Show committed partitions of a processed dataset
    Inspect {
        #[arg(short, long)]
        dataset: String,
    },
}

fn init_logging(config: &PipelineConfig) {
    let env = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();
}

fn transform(config: &PipelineConfig, dataset: &str, json: bool) -> Result<()> {
    match run_transform(config, dataset) {
        Ok(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("rejections: {}", report.summary);
                println!(
                    "deduplicated: {} rows ({} duplicates dropped)",
                    report.deduplicated_rows, report.duplicates_dropped
                );
                println!(
                    "committed {} ({} partitions)",
                    report.write.version,
                    report.write.partitions.len()
                );
                for p in &report.write.partitions {
                    println!("  {} ({} rows)", p.partition, p.rows);
                }
            }
            Ok(())
        }
        Err(PipelineError::RejectionThresholdExceeded(summary)) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("rejections: {summary}");
            }
            Err(PipelineError::RejectionThresholdExceeded(summary).into())
        }
        Err(e) => Err(e).with_context(|| format!("transform of `{dataset}` failed")),
    }
}

fn analytics(config: &PipelineConfig, datasets: &[String], json: bool) -> Result<()> {
    let tables = run_analytics(config, datasets).context("analytics run failed")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&tables)?);
        return Ok(());
    }
    for t in &tables {
        println!("== {} ==", t.name);
        println!("{t}");
    }
    Ok(())
}

fn inspect(config: &PipelineConfig, dataset: &str) -> Result<()> {
    let store = ProcessedStore::new(&config.data_dir);
    let partitions = inspect_dataset(&store, dataset)
        .with_context(|| format!("cannot inspect `{dataset}`"))?;
    if partitions.is_empty() {
        println!("no committed partitions for `{dataset}`");
    }
    for p in &partitions {
        print!("{p}");
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let mut config = PipelineConfig::load(cli.config.as_deref()).context("loading config")?;
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }
    init_logging(&config);
    info!(data_dir = %config.data_dir.display(), "startup");

    match &cli.command {
        Command::Transform { dataset } => transform(&config, dataset, cli.json),
        Command::Analytics { dataset } => analytics(&config, dataset, cli.json),
        Command::Inspect { dataset } => inspect(&config, dataset),
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = err
                .downcast_ref::<PipelineError>()
                .map_or(1, PipelineError::exit_code);
            ExitCode::from(code as u8)
        }
    }
}
