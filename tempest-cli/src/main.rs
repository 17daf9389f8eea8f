//! Tempest CLI — run the weather/stock pipeline, or any single stage of it.
//!
//! Commands:
//! - `run`: execute the full task graph and print the run report
//! - `clear`: empty the raw / processed / output directories
//! - `extract <source>`: fetch one source and stage its raw bodies
//! - `clean`, `enrich`, `merge`: run one transform on staged artifacts
//! - `load`: load a staged artifact into a database table

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tempest_core::extract::HttpFetcher;
use tempest_core::load;
use tempest_core::transform::{self, CleanSpec, Dataset, EnrichSpec, JoinMode, MergeSpec};
use tempest_core::Artifact;
use tempest_runner::pipeline::extractor;
use tempest_runner::{run_pipeline, PipelineConfig, PipelineContext};
use tracing_subscriber::EnvFilter;

/// Used when `--config` is not given and the file exists.
const DEFAULT_CONFIG: &str = "tempest.toml";

#[derive(Parser)]
#[command(
    name = "tempest",
    about = "Tempest: scheduled weather and stock ETL pipeline"
)]
struct Cli {
    /// Path to the pipeline TOML config. Defaults to ./tempest.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG still takes precedence).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the full task graph.
    Run,
    /// Remove every artifact under the raw, processed and output directories.
    Clear,
    /// Fetch one source: current_weather, historical_weather or stock.
    Extract {
        source: String,
    },
    /// Normalize, sort and de-duplicate one artifact.
    Clean {
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        output_name: String,

        /// Time column to sort on.
        #[arg(long)]
        sort_by: String,

        /// weather or stock.
        #[arg(long)]
        dataset: Dataset,

        /// Stock: keep the time of day (seconds precision).
        #[arg(long, default_value_t = false)]
        has_time: bool,

        /// Weather: render dates only.
        #[arg(long, default_value_t = false)]
        date_only: bool,
    },
    /// Rewrite a time column into its hour bucket.
    Enrich {
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        output_name: String,

        #[arg(long)]
        column: String,

        /// weather or stock.
        #[arg(long)]
        dataset: Dataset,

        /// Weather: floor to the hour (stock is always floored).
        #[arg(long, default_value_t = false)]
        to_hour: bool,
    },
    /// Join two artifacts on a time key.
    Merge {
        #[arg(long)]
        left: PathBuf,

        #[arg(long)]
        right: PathBuf,

        #[arg(long)]
        left_on: String,

        #[arg(long)]
        right_on: String,

        #[arg(long)]
        output_name: String,

        /// inner or left.
        #[arg(long, default_value = "inner")]
        how: JoinMode,
    },
    /// Recreate a table from an artifact.
    Load {
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        table: String,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    let store = config.store();

    match cli.command {
        Commands::Run => run_all(&config),
        Commands::Clear => {
            let removed = store.clear()?;
            println!("Removed {removed} entries");
            Ok(())
        }
        Commands::Extract { source } => {
            let extractor = extractor(&config, &source, &[])?;
            let fetcher = HttpFetcher::new(config.http_timeout())?;
            let outputs = extractor
                .run(&fetcher, &store)
                .with_context(|| format!("extract '{source}' failed"))?;
            for (name, artifact) in &outputs {
                println!("{name}\t{}", artifact.path.display());
            }
            Ok(())
        }
        Commands::Clean {
            input,
            output_name,
            sort_by,
            dataset,
            has_time,
            date_only,
        } => {
            let spec = match dataset {
                Dataset::Stock => CleanSpec::stock(output_name, sort_by, has_time),
                Dataset::Weather => CleanSpec::weather(output_name, sort_by, date_only),
            };
            print_artifact(&transform::clean(&store, &input, &spec)?);
            Ok(())
        }
        Commands::Enrich {
            input,
            output_name,
            column,
            dataset,
            to_hour,
        } => {
            let spec = match dataset {
                Dataset::Stock => EnrichSpec::stock(output_name, column),
                Dataset::Weather => EnrichSpec::weather(output_name, column, to_hour),
            };
            print_artifact(&transform::enrich(&store, &input, &spec)?);
            Ok(())
        }
        Commands::Merge {
            left,
            right,
            left_on,
            right_on,
            output_name,
            how,
        } => {
            let spec = MergeSpec {
                output_name,
                left_on,
                right_on,
                how,
            };
            print_artifact(&transform::merge(&store, &left, &right, &spec)?);
            Ok(())
        }
        Commands::Load { input, table } => {
            let summary = load::load(&store, &input, &table, &config.database)?;
            println!(
                "Loaded {} rows into '{}' ({} columns)",
                summary.rows,
                summary.table,
                summary.schema.columns.len()
            );
            print_artifact(&summary.audit);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => Ok(PipelineConfig::from_file(path)?),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            Ok(PipelineConfig::from_file(Path::new(DEFAULT_CONFIG))?)
        }
        None => {
            let mut config = PipelineConfig::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }
}

fn run_all(config: &PipelineConfig) -> Result<()> {
    let ctx = PipelineContext::from_config(config)?;
    let report = run_pipeline(config, &ctx)?;
    println!("{report}");
    if !report.is_success() {
        bail!(
            "pipeline incomplete: {} failed, {} skipped",
            report.failed().len(),
            report.skipped().len()
        );
    }
    Ok(())
}

fn print_artifact(artifact: &Artifact) {
    println!("{}", artifact.path.display());
}
