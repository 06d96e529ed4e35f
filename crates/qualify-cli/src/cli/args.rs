use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "qualify",
    version,
    about = "Protocol-driven qualification test execution with acceptance and QC evaluation"
)]
pub struct Cli {
    /// Path to qualify.yaml (defaults to ./qualify.yaml when present)
    #[arg(long, global = true, env = "QUALIFY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `qualify_core=trace` (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[arg(long, global = true, value_enum, default_value_t)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate a protocol definition
    Validate(ValidateArgs),
    /// Execute a protocol against a specimen from a session script
    Run(RunArgs),
    /// Show a stored run
    Show(ShowArgs),
    /// List stored runs, newest first
    List(ListArgs),
    /// Recompute QC checks for a stored run
    Qc(QcArgs),
    /// Degradation and stabilization analysis of a stored run
    Degradation(DegradationArgs),
    /// Change the quality flag of a recorded measurement
    Flag(FlagArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(clap::Args, Clone, Debug, Default)]
pub struct DbArgs {
    /// SQLite database (defaults to the configured database)
    #[arg(long)]
    pub db: Option<PathBuf>,
}

#[derive(clap::Args, Clone, Debug)]
pub struct ValidateArgs {
    /// Protocol file (.json, .yaml or .yml)
    pub protocol: PathBuf,

    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

#[derive(clap::Args, Clone, Debug)]
pub struct RunArgs {
    #[arg(long)]
    pub protocol: PathBuf,

    #[arg(long)]
    pub specimen: String,

    #[arg(long)]
    pub operator: String,

    /// JSON session script: parameters and the ordered steps to execute
    #[arg(long)]
    pub session: PathBuf,

    /// Run parameter override, `name=value` (value parsed as JSON, else taken as text)
    #[arg(long = "param", value_name = "NAME=VALUE")]
    pub params: Vec<String>,

    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

#[derive(clap::Args, Clone, Debug)]
pub struct ShowArgs {
    #[arg(long)]
    pub run: String,

    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

#[derive(clap::Args, Clone, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

#[derive(clap::Args, Clone, Debug)]
pub struct QcArgs {
    #[arg(long)]
    pub run: String,

    /// Protocol the run was executed against (defaults to a lookup in protocols_dir)
    #[arg(long)]
    pub protocol: Option<PathBuf>,

    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

#[derive(clap::Args, Clone, Debug)]
pub struct DegradationArgs {
    #[arg(long)]
    pub run: String,

    /// Power parameter to analyze
    #[arg(long, default_value = "pmax")]
    pub parameter: String,

    /// Baseline power; defaults to the mean of the initial readings
    #[arg(long)]
    pub baseline: Option<f64>,

    /// Stabilization window (points)
    #[arg(long, default_value_t = 3)]
    pub window: usize,

    /// Stabilization threshold (percentage points)
    #[arg(long, default_value_t = 0.5)]
    pub threshold: f64,

    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum FlagValue {
    Good,
    Suspect,
    Bad,
}

#[derive(clap::Args, Clone, Debug)]
pub struct FlagArgs {
    #[arg(long)]
    pub run: String,

    #[arg(long)]
    pub measurement: String,

    #[arg(long, value_enum)]
    pub flag: FlagValue,

    #[arg(long)]
    pub notes: Option<String>,

    /// Protocol the run was executed against (defaults to a lookup in protocols_dir)
    #[arg(long)]
    pub protocol: Option<PathBuf>,

    #[command(flatten)]
    pub db: DbArgs,
}
