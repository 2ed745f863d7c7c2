use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "investordb",
    version,
    about = "Investor profile normalization and relational export tooling"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Load(LoadArgs),
    Status(StatusArgs),
    Verify(VerifyArgs),
}

#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// Source file: one JSON object per line, or a single JSON array.
    #[arg(long)]
    pub source: PathBuf,

    #[arg(long, default_value = "investordb.sqlite")]
    pub db_path: PathBuf,

    #[arg(long, default_value = "load_report.json")]
    pub report_path: PathBuf,

    /// Rows buffered per child table before a bulk write.
    #[arg(long, default_value_t = 1000)]
    pub batch_size: usize,

    /// Truncate all target tables (children before parents) before loading.
    #[arg(long, default_value_t = false)]
    pub reset: bool,

    #[arg(long)]
    pub max_records: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = "investordb.sqlite")]
    pub db_path: PathBuf,

    #[arg(long, default_value = "load_report.json")]
    pub report_path: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    #[arg(long, default_value = "investordb.sqlite")]
    pub db_path: PathBuf,

    #[arg(long, default_value = "verify_report.json")]
    pub report_path: PathBuf,
}
