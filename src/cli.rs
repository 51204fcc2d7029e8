use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::model::DropKind;

#[derive(Parser, Debug)]
#[command(
    name = "drop-ingest",
    version,
    about = "Load ADS-B and drone sensor drops into the data lake and ClickHouse"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert, chunk and bulk-load drops into the store.
    Import(ImportArgs),
    /// Move Parquet drops into their Hive partition.
    Dispatch(DispatchArgs),
    /// Show the site table or resolve names against it.
    Sites(SitesArgs),
    /// Summarize the import ledger.
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct LakeArgs {
    #[arg(short = 'D', long, env = "DROP_INGEST_DATALAKE")]
    pub datalake: Option<PathBuf>,

    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    #[arg(short = 'S', long)]
    pub sites: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    #[arg(long, env = "CLICKHOUSE_HOST")]
    pub host: Option<String>,

    #[arg(long, env = "CLICKHOUSE_USER")]
    pub user: Option<String>,

    #[arg(long, env = "CLICKHOUSE_PASSWD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(long, env = "CLICKHOUSE_DB")]
    pub database: Option<String>,

    #[arg(long)]
    pub table: Option<String>,

    #[arg(long)]
    pub client: Option<String>,

    #[arg(long)]
    pub converter: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    #[arg(value_enum)]
    pub kind: DropKind,

    #[command(flatten)]
    pub lake: LakeArgs,

    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(short = 'n', long, default_value_t = false)]
    pub dry_run: bool,

    #[arg(short = 'd', long, default_value_t = false)]
    pub delete: bool,

    #[arg(short = 'r', long, default_value_t = false)]
    pub recursive: bool,

    #[arg(long)]
    pub chunk_size: Option<usize>,

    #[arg(long)]
    pub pacing_ms: Option<u64>,

    #[arg(long, default_value_t = false)]
    pub require_sites: bool,

    #[arg(long, default_value_t = false)]
    pub resume_failed: bool,

    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct DispatchArgs {
    #[command(flatten)]
    pub lake: LakeArgs,

    #[arg(long, default_value_t = false)]
    pub drones: bool,

    #[arg(short = 'n', long, default_value_t = false)]
    pub dry_run: bool,

    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct SitesArgs {
    #[command(flatten)]
    pub lake: LakeArgs,

    /// Filenames or bare tokens to resolve against the table.
    pub names: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub lake: LakeArgs,

    #[arg(long, value_enum)]
    pub kind: Option<DropKind>,

    #[arg(long, default_value_t = false)]
    pub failed_only: bool,
}
