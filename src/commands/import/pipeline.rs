use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use super::backfill::backfill;
use super::chunks::{ChunkedLoader, Pacer};
use super::convert::{CanonicalCsv, CsvOrigin, normalize};
use super::discover::matches_kind;
use super::ledger::{ImportLedger, LedgerEntry};
use crate::config::ImportSettings;
use crate::error::DropError;
use crate::filename::FilenameParser;
use crate::model::{DropFormat, DropKind, FileReport, ImportOutcome, ParsedIdentity, RawDrop};
use crate::runner::{CommandRunner, Invocation, run_to_success};
use crate::sites::SiteRegistry;
use crate::util::{now_utc_string, sha256_file};

/// Read-only collaborators shared by every stage of one run.
pub struct ImportContext<'a> {
    pub settings: &'a ImportSettings,
    pub registry: &'a SiteRegistry,
    pub parser: &'a FilenameParser,
    pub runner: &'a dyn CommandRunner,
    pub pacer: &'a dyn Pacer,
}

impl ImportContext<'_> {
    /// Logs the rendered command, then runs it unless this is a dry-run.
    pub fn execute(&self, invocation: &Invocation, step: &str) -> Result<(), String> {
        info!(
            step,
            dry_run = self.settings.dry_run,
            command = %invocation.render(),
            "external command"
        );
        if self.settings.dry_run {
            return Ok(());
        }
        run_to_success(self.runner, invocation).map(|_| ())
    }
}

enum Plan {
    Fresh,
    ResumeLoad {
        start_chunk: usize,
        previous: LedgerEntry,
    },
    ResumeBackfill {
        previous: LedgerEntry,
    },
}

#[derive(Default)]
struct Progress {
    csv_sha256: Option<String>,
    chunks_loaded: usize,
}

pub struct Orchestrator<'c, 'a> {
    ctx: &'c ImportContext<'a>,
    ledger: &'c ImportLedger,
    run_id: String,
}

impl<'c, 'a> Orchestrator<'c, 'a> {
    pub fn new(ctx: &'c ImportContext<'a>, ledger: &'c ImportLedger, run_id: impl Into<String>) -> Self {
        Self {
            ctx,
            ledger,
            run_id: run_id.into(),
        }
    }

    /// Files are handled strictly one after another; a failing file never
    /// stops the ones after it.
    pub fn run(&self, inputs: &[PathBuf]) -> Vec<FileReport> {
        let mut reports = Vec::with_capacity(inputs.len());
        for (index, path) in inputs.iter().enumerate() {
            debug!(file = %path.display(), index = index + 1, total = inputs.len(), "processing drop");
            let report = self.process(path);
            info!(
                file = %path.display(),
                outcome = report.outcome.as_str(),
                site = %report.site.as_deref().unwrap_or("-"),
                chunks_loaded = report.chunks_loaded,
                deleted = report.deleted,
                "drop finished"
            );
            reports.push(report);
        }
        reports
    }

    fn process(&self, path: &Path) -> FileReport {
        let kind = self.ctx.settings.kind;
        let mut drop = RawDrop::classify(path, kind);
        let name = drop.file_name();

        if !matches_kind(kind, &name) {
            debug!(file = %path.display(), kind = %kind, "not a drop of this kind");
            return FileReport::new(path, kind, ImportOutcome::SkippedWrongKind);
        }
        if drop.format == DropFormat::Other {
            let err = DropError::UnsupportedFormat(path.to_path_buf());
            warn!(file = %path.display(), "unsupported drop format, left untouched");
            return FileReport::new(path, kind, ImportOutcome::SkippedUnsupportedFormat)
                .with_detail(err.to_string());
        }

        let identity = match self.ctx.parser.parse_drop(kind, &name) {
            Ok(identity) => identity,
            Err(err) => {
                warn!(file = %path.display(), error = %err, "filename not recognized");
                return FileReport::new(path, kind, ImportOutcome::SkippedBadName)
                    .with_detail(err.to_string());
            }
        };

        let drop_key = drop.identity_stem();
        let site = match self.resolve_site(kind, &identity) {
            Ok(site) => site,
            Err(err) => {
                warn!(file = %path.display(), error = %err, "site not in registry, drop skipped");
                let report = FileReport::new(path, kind, ImportOutcome::SkippedUnresolvedSite)
                    .with_detail(err.to_string());
                self.remember(&drop_key, &report, &Progress::default());
                return report;
            }
        };

        let mut report = FileReport::new(path, kind, ImportOutcome::Loaded);
        report.site = site;

        let Some(plan) = self.plan(&drop, &drop_key, &mut report) else {
            return report;
        };

        match plan {
            Plan::ResumeBackfill { previous } => {
                info!(file = %path.display(), "resuming at site backfill");
                report.chunks_total = previous.chunks_total;
                let progress = Progress {
                    csv_sha256: previous.csv_sha256,
                    chunks_loaded: previous.chunks_loaded,
                };
                let sibling = sibling_csv(&drop);
                self.finish(&drop, &drop_key, sibling.as_deref(), &mut report, progress);
                report
            }
            Plan::Fresh => {
                self.convert_and_load(&mut drop, &drop_key, 1, None, &mut report);
                report
            }
            Plan::ResumeLoad {
                start_chunk,
                previous,
            } => {
                info!(file = %path.display(), start_chunk, "resuming failed load");
                self.convert_and_load(&mut drop, &drop_key, start_chunk, Some(previous), &mut report);
                report
            }
        }
    }

    fn resolve_site(&self, kind: DropKind, identity: &ParsedIdentity) -> Result<Option<String>, DropError> {
        if !kind.needs_site() {
            return Ok(None);
        }
        let token = identity.site_token.as_deref().unwrap_or_default();
        let id = self.ctx.registry.resolve(token)?;
        debug!(token, site = id, variant = ?identity.variant, "site resolved");
        Ok(Some(id.to_string()))
    }

    /// Decides from the ledger whether the drop runs, resumes or is skipped.
    /// `None` means `report` is already final.
    fn plan(&self, drop: &RawDrop, drop_key: &str, report: &mut FileReport) -> Option<Plan> {
        let settings = self.ctx.settings;
        let kind = settings.kind;
        let previous = match self.ledger.get(kind, drop_key) {
            Ok(previous) => previous,
            Err(err) => {
                warn!(drop = drop_key, error = %err, "ledger lookup failed, treating drop as new");
                None
            }
        };
        let Some(previous) = previous else {
            return Some(Plan::Fresh);
        };

        if previous.outcome.is_terminal_success(kind) {
            info!(drop = drop_key, run_id = %previous.run_id, "already imported");
            report.outcome = ImportOutcome::SkippedAlreadyImported;
            report.chunks_total = previous.chunks_total;
            if settings.delete {
                let sibling = sibling_csv(drop);
                report.deleted = self.delete_sources(drop, sibling.as_deref());
                if report.deleted {
                    let mut entry = previous;
                    entry.deleted = true;
                    entry.updated_at = now_utc_string();
                    self.store(&entry);
                }
            }
            return None;
        }

        let outcome = previous.outcome;
        match outcome {
            ImportOutcome::FailedBackfill => Some(Plan::ResumeBackfill { previous }),
            ImportOutcome::Loaded if kind == DropKind::Adsb => {
                Some(Plan::ResumeBackfill { previous })
            }
            ImportOutcome::FailedLoad if settings.resume_failed => Some(Plan::ResumeLoad {
                start_chunk: previous.failed_chunk.unwrap_or(1),
                previous,
            }),
            ImportOutcome::FailedLoad => {
                let chunk = previous
                    .failed_chunk
                    .map(|chunk| chunk.to_string())
                    .unwrap_or_else(|| "?".to_string());
                warn!(drop = drop_key, chunk = %chunk, "previous load failed, pass --resume-failed to retry");
                report.outcome = ImportOutcome::SkippedPreviousFailure;
                report.failed_chunk = previous.failed_chunk;
                report.chunks_total = previous.chunks_total;
                report.detail = Some(format!(
                    "load failed at chunk {chunk} in run {}; retry with --resume-failed",
                    previous.run_id
                ));
                None
            }
            _ => Some(Plan::Fresh),
        }
    }

    fn convert_and_load(
        &self,
        drop: &mut RawDrop,
        drop_key: &str,
        start_chunk: usize,
        previous: Option<LedgerEntry>,
        report: &mut FileReport,
    ) {
        let settings = self.ctx.settings;
        let scratch_dir = settings.layout.scratch_root.join(drop_key);

        let canonical = match normalize(self.ctx, drop, &scratch_dir) {
            Ok(canonical) => canonical,
            Err(err) => {
                error!(file = %drop.path.display(), error = %err, "conversion failed");
                report.outcome = match err {
                    DropError::UnsupportedFormat(_) => ImportOutcome::SkippedUnsupportedFormat,
                    _ => ImportOutcome::FailedConversion,
                };
                report.detail = Some(err.to_string());
                self.remember(drop_key, report, &Progress::default());
                return;
            }
        };
        debug!(csv = %canonical.path.display(), origin = ?canonical.origin, "canonical csv ready");

        let csv_sha256 = self.fingerprint(&canonical);
        let mut already_loaded = 0;
        if let Some(previous) = &previous {
            if let Some(reason) = resume_mismatch(previous, csv_sha256.as_deref(), settings.chunk_size) {
                warn!(drop = drop_key, reason = %reason, "cannot resume failed load");
                report.outcome = ImportOutcome::SkippedPreviousFailure;
                report.failed_chunk = previous.failed_chunk;
                report.detail = Some(reason);
                return;
            }
            already_loaded = start_chunk.saturating_sub(1);
        }

        let loader = ChunkedLoader::new(self.ctx);
        let load = match loader.load(&canonical.path, &scratch_dir, start_chunk) {
            Ok(load) => load,
            Err(err) => {
                report.outcome = ImportOutcome::FailedLoad;
                report.detail = Some(err.to_string());
                let mut progress = Progress {
                    csv_sha256,
                    chunks_loaded: already_loaded,
                };
                if let DropError::FailedLoad { chunk, total, .. } = err {
                    report.failed_chunk = Some(chunk);
                    report.chunks_total = Some(total);
                    report.chunks_loaded = chunk.saturating_sub(start_chunk);
                    progress.chunks_loaded = chunk.saturating_sub(1);
                }
                self.remember(drop_key, report, &progress);
                return;
            }
        };

        debug!(columns = load.header.len(), scratch_removed = load.scratch_removed, "load complete");
        report.rows = load.rows;
        report.chunks_total = load.chunks_total;
        report.chunks_loaded = load.chunks_loaded;
        let progress = Progress {
            csv_sha256,
            chunks_loaded: already_loaded + load.chunks_loaded,
        };

        let sibling = match canonical.origin {
            CsvOrigin::SiblingCsv => Some(canonical.path.clone()),
            _ => None,
        };
        self.finish(drop, drop_key, sibling.as_deref(), report, progress);
    }

    /// Loaded → site corrected (ADS-B) → deleted when requested.
    fn finish(
        &self,
        drop: &RawDrop,
        drop_key: &str,
        sibling: Option<&Path>,
        report: &mut FileReport,
        progress: Progress,
    ) {
        let kind = self.ctx.settings.kind;
        report.outcome = ImportOutcome::Loaded;
        report.failed_chunk = None;
        report.detail = None;

        if kind.needs_site() {
            self.remember(drop_key, report, &progress);
            let site = report.site.clone().unwrap_or_default();
            match backfill(self.ctx, &site) {
                Ok(()) => report.outcome = ImportOutcome::SiteBackfilled,
                Err(err) => {
                    report.outcome = ImportOutcome::FailedBackfill;
                    report.detail = Some(err.to_string());
                    self.remember(drop_key, report, &progress);
                    return;
                }
            }
        }

        if self.ctx.settings.delete && report.outcome.is_terminal_success(kind) {
            report.deleted = self.delete_sources(drop, sibling);
        }
        self.remember(drop_key, report, &progress);
    }

    fn fingerprint(&self, canonical: &CanonicalCsv) -> Option<String> {
        if self.ctx.settings.dry_run || !canonical.path.exists() {
            return None;
        }
        match sha256_file(&canonical.path) {
            Ok(digest) => Some(digest),
            Err(err) => {
                warn!(csv = %canonical.path.display(), error = %err, "failed to fingerprint csv");
                None
            }
        }
    }

    fn delete_sources(&self, drop: &RawDrop, sibling: Option<&Path>) -> bool {
        let targets = deletion_targets(drop, sibling, self.ctx.settings.dry_run);
        if self.ctx.settings.dry_run {
            for target in &targets {
                info!(file = %target.display(), dry_run = true, "would delete source");
            }
            return false;
        }

        let mut deleted = true;
        for target in &targets {
            match fs::remove_file(target) {
                Ok(()) => info!(file = %target.display(), "deleted source"),
                Err(err) => {
                    warn!(file = %target.display(), error = %err, "failed to delete source");
                    deleted = false;
                }
            }
        }
        deleted
    }

    fn remember(&self, drop_key: &str, report: &FileReport, progress: &Progress) {
        let entry = LedgerEntry {
            kind: report.kind,
            drop_key: drop_key.to_string(),
            source_path: report.source.clone(),
            site_id: report.site.clone(),
            outcome: report.outcome,
            csv_sha256: progress.csv_sha256.clone(),
            chunk_size: Some(self.ctx.settings.chunk_size),
            chunks_total: report.chunks_total,
            chunks_loaded: progress.chunks_loaded,
            failed_chunk: report.failed_chunk,
            detail: report.detail.clone(),
            deleted: report.deleted,
            run_id: self.run_id.clone(),
            updated_at: now_utc_string(),
        };
        self.store(&entry);
    }

    fn store(&self, entry: &LedgerEntry) {
        if let Err(err) = self.ledger.record(entry) {
            warn!(drop = %entry.drop_key, error = %err, "failed to update import ledger");
        }
    }
}

/// A dry-run never decompresses, so the file still on disk is the one
/// that was discovered.
pub(super) fn deletion_targets(drop: &RawDrop, sibling: Option<&Path>, dry_run: bool) -> Vec<PathBuf> {
    let source = if dry_run { &drop.origin } else { &drop.path };
    std::iter::once(source.clone())
        .chain(sibling.map(Path::to_path_buf))
        .collect()
}

fn sibling_csv(drop: &RawDrop) -> Option<PathBuf> {
    if drop.format != DropFormat::Parquet {
        return None;
    }
    let sibling = drop.path.with_extension("csv");
    sibling.exists().then_some(sibling)
}

/// Chunk boundaries only line up with the failed run when the CSV and the
/// chunk size are unchanged.
fn resume_mismatch(previous: &LedgerEntry, csv_sha256: Option<&str>, chunk_size: usize) -> Option<String> {
    if let (Some(recorded), Some(current)) = (previous.csv_sha256.as_deref(), csv_sha256) {
        if recorded != current {
            return Some(format!(
                "csv changed since the failed load (sha256 {recorded} != {current})"
            ));
        }
    }
    match previous.chunk_size {
        Some(recorded) if recorded != chunk_size => Some(format!(
            "chunk size changed since the failed load ({recorded} != {chunk_size})"
        )),
        _ => None,
    }
}
