use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::chunks::{Pacer, ThreadPacer};
use super::discover::expand_inputs;
use super::ledger::ImportLedger;
use super::pipeline::{ImportContext, Orchestrator};
use crate::cli::ImportArgs;
use crate::config::{ImportSettings, LakeLayout};
use crate::filename::FilenameParser;
use crate::model::{DropKind, ImportCounts, ImportRunManifest};
use crate::runner::{CommandRunner, SystemRunner};
use crate::sites::SiteRegistry;
use crate::util::{
    ensure_directory, ensure_writable_directory, now_utc_string, utc_compact_string,
    utc_day_string, write_json_pretty,
};

const MANIFEST_VERSION: u32 = 1;

pub fn run(args: ImportArgs) -> Result<()> {
    let settings = ImportSettings::resolve(&args)?;
    let manifest = run_import(&settings, &args.files, &SystemRunner, &ThreadPacer)?;

    if manifest.counts.failed > 0 {
        bail!(
            "{} of {} drops failed, see {}",
            manifest.counts.failed,
            manifest.counts.files_seen,
            settings.layout.report_dir.display()
        );
    }
    Ok(())
}

pub fn run_import(
    settings: &ImportSettings,
    inputs: &[PathBuf],
    runner: &dyn CommandRunner,
    pacer: &dyn Pacer,
) -> Result<ImportRunManifest> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("import-{}-{}", settings.kind, utc_compact_string(started_ts));
    let layout = &settings.layout;

    info!(run_id = %run_id, dry_run = settings.dry_run, "starting import");

    if !settings.dry_run {
        ensure_writable_directory(&layout.scratch_root)?;
        ensure_writable_directory(&layout.report_dir)?;
    }

    let registry = if settings.kind.needs_site() {
        let registry = SiteRegistry::load(&layout.sites_path)?;
        if settings.require_sites {
            registry.require_non_empty(&layout.sites_path)?;
        }
        registry
    } else {
        SiteRegistry::default()
    };
    let parser = FilenameParser::new()?;
    let ledger = open_ledger(&layout.ledger_path, settings.dry_run)?;
    debug!(path = %layout.ledger_path.display(), writable = ledger.is_writable(), "ledger ready");

    let files = expand_inputs(inputs, settings.recursive)?;
    if files.is_empty() {
        warn!("no input files found");
    }

    let ctx = ImportContext {
        settings,
        registry: &registry,
        parser: &parser,
        runner,
        pacer,
    };
    let reports = Orchestrator::new(&ctx, &ledger, run_id.clone()).run(&files);
    let counts = ImportCounts::tally(&reports);

    let manifest = ImportRunManifest {
        manifest_version: MANIFEST_VERSION,
        run_id,
        kind: settings.kind,
        started_at,
        finished_at: now_utc_string(),
        dry_run: settings.dry_run,
        delete_requested: settings.delete,
        chunk_size: settings.chunk_size,
        pacing_ms: settings.pacing.as_millis() as u64,
        counts,
        files: reports,
    };

    if !settings.dry_run {
        let manifest_path = layout.report_dir.join(format!(
            "import_{}_{}.json",
            settings.kind,
            utc_compact_string(started_ts)
        ));
        write_json_pretty(&manifest_path, &manifest)?;
        info!(path = %manifest_path.display(), "wrote import manifest");
    }

    info!(
        run_id = %manifest.run_id,
        files = manifest.counts.files_seen,
        succeeded = manifest.counts.succeeded,
        skipped = manifest.counts.skipped,
        failed = manifest.counts.failed,
        deleted = manifest.counts.deleted,
        chunks_loaded = manifest.counts.chunks_loaded,
        dry_run = manifest.dry_run,
        "import finished"
    );

    Ok(manifest)
}

fn open_ledger(path: &Path, dry_run: bool) -> Result<ImportLedger> {
    if dry_run {
        return ImportLedger::open_read_only(path);
    }
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }
    ImportLedger::open(path)
}

pub fn run_log_path(layout: &LakeLayout, kind: DropKind, ts: DateTime<Utc>) -> PathBuf {
    layout
        .log_dir
        .join(format!("import-{}-{}.log", kind, utc_day_string(ts)))
}

/// Dated append-only log for real imports. Dry-runs write nowhere.
pub fn open_run_log(args: &ImportArgs) -> Result<Option<File>> {
    if args.dry_run {
        return Ok(None);
    }
    let (layout, _) = LakeLayout::resolve(&args.lake)?;
    ensure_writable_directory(&layout.log_dir)?;

    let path = run_log_path(&layout, args.kind, Utc::now());
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    Ok(Some(file))
}
