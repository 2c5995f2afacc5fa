use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "stockrec",
    version,
    about = "Warehouse snapshot/count reconciliation tooling"
)]
pub struct Cli {
    /// Raise the default log level to debug (RUST_LOG still wins).
    #[arg(long, short = 'v', global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Sync(SyncArgs),
    Report(ReportArgs),
    Correct(CorrectArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Directory holding the per-depot spreadsheet exports.
    #[arg(long, default_value = "db_files")]
    pub snapshot_dir: PathBuf,

    #[arg(long, default_value = "inventario.db")]
    pub db_path: PathBuf,

    /// Destination for the discrepancy CSV; defaults to a timestamped file.
    #[arg(long)]
    pub report_path: Option<PathBuf>,

    #[arg(long)]
    pub run_manifest_path: Option<PathBuf>,

    /// Drop and recreate the local store before running.
    #[arg(long, default_value_t = false)]
    pub reset: bool,

    #[arg(long, default_value_t = false)]
    pub skip_snapshots: bool,

    #[arg(long, default_value_t = false)]
    pub skip_remote: bool,

    #[arg(long, default_value_t = false)]
    pub skip_backfill: bool,

    /// Also print report rows to the console.
    #[arg(long, default_value_t = false)]
    pub print_report: bool,

    /// Remote fetch page size.
    #[arg(long, default_value_t = 500)]
    pub batch_size: usize,

    /// Metadata lookup batch size.
    #[arg(long, default_value_t = 50)]
    pub backfill_batch_size: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ReportArgs {
    #[arg(long, default_value = "inventario.db")]
    pub db_path: PathBuf,

    #[arg(long)]
    pub report_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub print_report: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CorrectArgs {
    #[arg(long, default_value = "inventario.db")]
    pub db_path: PathBuf,

    #[arg(long)]
    pub sku: String,

    #[arg(long)]
    pub location: String,

    #[arg(long)]
    pub section: i64,

    #[arg(long)]
    pub site: String,

    #[arg(long)]
    pub operator: String,

    #[arg(long)]
    pub note: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = "inventario.db")]
    pub db_path: PathBuf,

    #[arg(long, default_value = "manifests")]
    pub manifest_dir: PathBuf,
}
