//! CLI argument structures for the heimdall binary.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Performance-regression sentinel for step-level test telemetry
#[derive(Parser)]
#[command(name = "heimdall")]
#[command(version = VERSION)]
#[command(about = "Heimdall - performance-regression sentinel for CI test telemetry")]
#[command(long_about = "
Maintain rolling statistical baselines for named test steps and classify
every new run as ok, new, drifting, or regressed. Aggregate results across
parallel CI jobs through a shared filesystem, object-store, or document
database backend.

Common Usage:

  # Analyze one run against a local history file
  heimdall analyze --run-file run.json --history-file history.json

  # Analyze with a config file and CI environment overrides
  heimdall analyze --run-file run.json --config heimdall.yml --environment ci

  # Per-job runs, then one aggregation per build
  heimdall aggregate --job-ids \"job-1,job-2\" --bucket-name perf-results

  # Initialize a baseline from archived runs
  heimdall seed --run-files 'runs/*.json' --history-file history.json
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze one run against the project baseline
    Analyze(AnalyzeArgs),

    /// Initialize the baseline from archived run files
    Seed(SeedArgs),

    /// Wait for parallel jobs and analyze their combined runs
    Aggregate(AggregateArgs),

    /// Apply retention policies to archived runs and job records
    Cleanup(CleanupArgs),

    /// Probe configuration and storage backend health
    #[command(name = "health-check")]
    HealthCheck(HealthCheckArgs),

    /// Initialize a configuration file with defaults
    #[command(name = "init-config")]
    InitConfig(InitConfigArgs),

    /// Print the default configuration in YAML format
    #[command(name = "print-default-config")]
    PrintDefaultConfig,

    /// Validate a heimdall configuration file
    #[command(name = "validate-config")]
    ValidateConfig(ValidateConfigArgs),
}

/// Storage and configuration selection shared by the data commands.
/// Exactly one of `--config`, `--db-connection`, `--bucket-name`, or
/// `--history-file` must identify where documents live.
#[derive(Args, Debug, Clone, Default)]
pub struct StorageArgs {
    /// Configuration file path
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Legacy single-file history target (pins the filesystem adapter)
    #[arg(long)]
    pub history_file: Option<PathBuf>,

    /// Document-database connection string
    #[arg(long, env = "HEIMDALL_DB_CONNECTION")]
    pub db_connection: Option<String>,

    /// Object-store bucket name
    #[arg(long, env = "HEIMDALL_BUCKET_NAME")]
    pub bucket_name: Option<String>,

    /// Project namespace for all persisted documents
    #[arg(long)]
    pub project_id: Option<String>,

    /// Environment override set to apply
    #[arg(long)]
    pub environment: Option<String>,

    /// Profile override set to apply (strict, lenient, ci_focused, or custom)
    #[arg(long)]
    pub profile: Option<String>,
}

#[derive(Args)]
pub struct AnalyzeArgs {
    /// Run file to analyze (a JSON sequence of step samples)
    #[arg(long)]
    pub run_file: PathBuf,

    #[command(flatten)]
    pub storage: StorageArgs,

    /// Override the standard-deviation threshold
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Override the baseline window size
    #[arg(long)]
    pub max_history: Option<usize>,

    /// Reporter to run (repeatable); defaults come from the configuration
    #[arg(long = "reporter")]
    pub reporters: Vec<String>,
}

#[derive(Args)]
pub struct SeedArgs {
    /// Glob matching archived run files
    #[arg(long)]
    pub run_files: String,

    #[command(flatten)]
    pub storage: StorageArgs,

    /// Override the baseline window size
    #[arg(long)]
    pub max_history: Option<usize>,
}

#[derive(Args)]
pub struct AggregateArgs {
    /// Comma-separated job ids to gather
    #[arg(long, value_delimiter = ',')]
    pub job_ids: Vec<String>,

    /// Wait for the jobs to finish before aggregating
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub wait_for_jobs: bool,

    /// Wait bound in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Write the aggregated samples to this file
    #[arg(long)]
    pub output_file: Option<PathBuf>,

    #[command(flatten)]
    pub storage: StorageArgs,

    /// Reporter to run (repeatable); defaults come from the configuration
    #[arg(long = "reporter")]
    pub reporters: Vec<String>,
}

#[derive(Args)]
pub struct CleanupArgs {
    /// Remove documents older than this age, e.g. `30d`
    #[arg(long)]
    pub older_than: String,

    /// Report what would be removed without deleting
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the interactive confirmation
    #[arg(long)]
    pub force: bool,

    #[command(flatten)]
    pub storage: StorageArgs,
}

#[derive(Args)]
pub struct HealthCheckArgs {
    #[command(flatten)]
    pub storage: StorageArgs,
}

#[derive(Args)]
pub struct InitConfigArgs {
    /// Output configuration file name
    #[arg(short, long, default_value = ".heimdall.yml")]
    pub output: PathBuf,

    /// Overwrite an existing configuration file
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args)]
pub struct ValidateConfigArgs {
    /// Path to the configuration file to validate
    #[arg(short, long, required = true)]
    pub config: PathBuf,

    /// Show the resolved configuration breakdown
    #[arg(long)]
    pub show_resolved: bool,
}
