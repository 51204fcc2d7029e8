use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{debug, info};

use crate::cli::{ImportArgs, LakeArgs, StoreArgs};
use crate::model::DropKind;

const CONFIG_FILE: &str = "drop-ingest.toml";
const SITES_FILE: &str = "sites.csv";
const LEDGER_FILE: &str = "import-ledger.sqlite";

pub const DEFAULT_DATABASE: &str = "acute";
pub const DEFAULT_CONVERTER: &str = "bdt convert";
pub const DEFAULT_DECOMPRESSOR: &str = "gunzip";
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;
pub const DEFAULT_PACING_MS: u64 = 1_000;
pub const DEFAULT_SENTINEL: &str = "0";

#[cfg(target_os = "macos")]
pub const DEFAULT_CLIENT: &str = "clickhouse client";
#[cfg(not(target_os = "macos"))]
pub const DEFAULT_CLIENT: &str = "clickhouse-client";

/// Optional TOML file; every key has a built-in default and CLI flags win.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub datalake: Option<PathBuf>,
    pub sites: Option<PathBuf>,
    pub scratch: Option<PathBuf>,
    pub client: Option<String>,
    pub converter: Option<String>,
    pub decompressor: Option<String>,
    pub database: Option<String>,
    pub chunk_size: Option<usize>,
    pub pacing_ms: Option<u64>,
    pub sentinel: Option<String>,
    pub tables: TablesConfig,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TablesConfig {
    pub adsb: Option<String>,
    pub drones: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: FileConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        debug!(path = %path.display(), ?config, "loaded config file");
        Ok(config)
    }

    /// `--config` must exist; the implicit `<datalake>/etc` file may not.
    fn discover(lake: &LakeArgs) -> Result<Self> {
        if let Some(path) = &lake.config {
            return Self::load(path);
        }
        if let Some(datalake) = &lake.datalake {
            let implicit = datalake.join("etc").join(CONFIG_FILE);
            if implicit.exists() {
                return Self::load(&implicit);
            }
        }
        Ok(Self::default())
    }
}

/// Directory layout under the datalake root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LakeLayout {
    pub datalake: PathBuf,
    pub data_root: PathBuf,
    pub sites_path: PathBuf,
    pub scratch_root: PathBuf,
    pub log_dir: PathBuf,
    pub report_dir: PathBuf,
    pub ledger_path: PathBuf,
}

impl LakeLayout {
    pub fn new(datalake: &Path) -> Self {
        Self {
            datalake: datalake.to_path_buf(),
            data_root: datalake.join("data"),
            sites_path: datalake.join("etc").join(SITES_FILE),
            scratch_root: datalake.join("var").join("scratch"),
            log_dir: datalake.join("var").join("log"),
            report_dir: datalake.join("var").join("reports"),
            ledger_path: datalake.join("var").join(LEDGER_FILE),
        }
    }

    pub fn resolve(lake: &LakeArgs) -> Result<(Self, FileConfig)> {
        let file = FileConfig::discover(lake)?;
        let Some(datalake) = lake.datalake.clone().or_else(|| file.datalake.clone()) else {
            bail!("no datalake specified, use --datalake, DROP_INGEST_DATALAKE or the config file");
        };

        let mut layout = Self::new(&datalake);
        if let Some(sites) = lake.sites.clone().or_else(|| file.sites.clone()) {
            layout.sites_path = sites;
        }
        if let Some(scratch) = &file.scratch {
            layout.scratch_root = scratch.clone();
        }
        Ok((layout, file))
    }
}

/// Store credentials come from flags or the environment, never from code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCredentials {
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Everything one import run needs, resolved once and passed down
/// read-only.
#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub kind: DropKind,
    pub layout: LakeLayout,
    pub client: String,
    pub converter: String,
    pub decompressor: String,
    pub database: String,
    pub table: String,
    pub credentials: StoreCredentials,
    pub chunk_size: usize,
    pub pacing: Duration,
    pub sentinel: String,
    pub dry_run: bool,
    pub delete: bool,
    pub recursive: bool,
    pub resume_failed: bool,
    pub require_sites: bool,
}

impl ImportSettings {
    pub fn resolve(args: &ImportArgs) -> Result<Self> {
        let (layout, file) = LakeLayout::resolve(&args.lake)?;
        let store = &args.store;

        let chunk_size = args
            .chunk_size
            .or(file.chunk_size)
            .unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 {
            bail!("chunk size must be at least one row");
        }
        let pacing_ms = args.pacing_ms.or(file.pacing_ms).unwrap_or(DEFAULT_PACING_MS);

        let table = store.table.clone().or_else(|| match args.kind {
            DropKind::Adsb => file.tables.adsb.clone(),
            DropKind::Drones => file.tables.drones.clone(),
        });

        let sentinel = file
            .sentinel
            .clone()
            .unwrap_or_else(|| DEFAULT_SENTINEL.to_string());
        if sentinel.trim().is_empty() {
            bail!("site sentinel must not be empty");
        }

        let settings = Self {
            kind: args.kind,
            layout,
            client: pick(&store.client, &file.client, DEFAULT_CLIENT),
            converter: pick(&store.converter, &file.converter, DEFAULT_CONVERTER),
            decompressor: file
                .decompressor
                .clone()
                .unwrap_or_else(|| DEFAULT_DECOMPRESSOR.to_string()),
            database: pick(&store.database, &file.database, DEFAULT_DATABASE),
            table: table.unwrap_or_else(|| args.kind.default_table().to_string()),
            credentials: credentials_from(store),
            chunk_size,
            pacing: Duration::from_millis(pacing_ms),
            sentinel,
            dry_run: args.dry_run,
            delete: args.delete,
            recursive: args.recursive,
            resume_failed: args.resume_failed,
            require_sites: args.require_sites,
        };

        info!(
            kind = %settings.kind,
            datalake = %settings.layout.datalake.display(),
            database = %settings.database,
            table = %settings.table,
            chunk_size = settings.chunk_size,
            pacing_ms,
            dry_run = settings.dry_run,
            delete = settings.delete,
            "resolved import settings"
        );
        Ok(settings)
    }
}

fn pick(cli: &Option<String>, file: &Option<String>, default: &str) -> String {
    cli.clone()
        .or_else(|| file.clone())
        .unwrap_or_else(|| default.to_string())
}

fn credentials_from(store: &StoreArgs) -> StoreCredentials {
    StoreCredentials {
        host: store.host.clone(),
        user: store.user.clone(),
        password: store.password.clone(),
    }
}
