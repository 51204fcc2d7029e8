use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DropKind {
    Adsb,
    Drones,
}

impl DropKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Adsb => "adsb",
            Self::Drones => "drones",
        }
    }

    pub fn default_table(self) -> &'static str {
        match self {
            Self::Adsb => "airplanes_raw",
            Self::Drones => "drones_raw",
        }
    }

    /// Drone rows carry no per-site column to repair.
    pub fn needs_site(self) -> bool {
        matches!(self, Self::Adsb)
    }

    pub fn parse_label(value: &str) -> Option<Self> {
        match value {
            "adsb" => Some(Self::Adsb),
            "drones" => Some(Self::Drones),
            _ => None,
        }
    }
}

impl std::fmt::Display for DropKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Compression {
    None,
    Gzip,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DropFormat {
    Csv,
    Parquet,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDrop {
    /// Where the artifact is now; follows decompression.
    pub path: PathBuf,
    /// The path as discovered, before any stage touched it.
    pub origin: PathBuf,
    pub kind: DropKind,
    pub compression: Compression,
    pub format: DropFormat,
}

impl RawDrop {
    pub fn classify(path: &Path, kind: DropKind) -> Self {
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or_default();
        let (compression, inner) = match name.strip_suffix(".gz") {
            Some(inner) => (Compression::Gzip, inner),
            None => (Compression::None, name),
        };
        let format = if inner.ends_with(".csv") {
            DropFormat::Csv
        } else if inner.ends_with(".parquet") {
            DropFormat::Parquet
        } else {
            DropFormat::Other
        };

        Self {
            path: path.to_path_buf(),
            origin: path.to_path_buf(),
            kind,
            compression,
            format,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|value| value.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Basename without compression or format suffixes; stable across
    /// decompression and conversion, so it keys ledger rows and scratch dirs.
    pub fn identity_stem(&self) -> String {
        let name = self.file_name();
        let name = name.strip_suffix(".gz").unwrap_or(&name);
        name.strip_suffix(".csv")
            .or_else(|| name.strip_suffix(".parquet"))
            .unwrap_or(name)
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedIdentity {
    pub site_token: Option<String>,
    /// Trailing digits of the site token, e.g. `2` for `Vienna2`.
    pub variant: Option<u32>,
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportOutcome {
    Loaded,
    SiteBackfilled,
    SkippedUnresolvedSite,
    SkippedWrongKind,
    SkippedBadName,
    SkippedUnsupportedFormat,
    SkippedAlreadyImported,
    SkippedPreviousFailure,
    FailedConversion,
    FailedLoad,
    FailedBackfill,
}

impl ImportOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::SiteBackfilled => "site_backfilled",
            Self::SkippedUnresolvedSite => "skipped_unresolved_site",
            Self::SkippedWrongKind => "skipped_wrong_kind",
            Self::SkippedBadName => "skipped_bad_name",
            Self::SkippedUnsupportedFormat => "skipped_unsupported_format",
            Self::SkippedAlreadyImported => "skipped_already_imported",
            Self::SkippedPreviousFailure => "skipped_previous_failure",
            Self::FailedConversion => "failed_conversion",
            Self::FailedLoad => "failed_load",
            Self::FailedBackfill => "failed_backfill",
        }
    }

    pub fn parse_label(value: &str) -> Option<Self> {
        [
            Self::Loaded,
            Self::SiteBackfilled,
            Self::SkippedUnresolvedSite,
            Self::SkippedWrongKind,
            Self::SkippedBadName,
            Self::SkippedUnsupportedFormat,
            Self::SkippedAlreadyImported,
            Self::SkippedPreviousFailure,
            Self::FailedConversion,
            Self::FailedLoad,
            Self::FailedBackfill,
        ]
        .into_iter()
        .find(|outcome| outcome.as_str() == value)
    }

    /// Terminal success for `kind`: the only state from which the source
    /// may be deleted.
    pub fn is_terminal_success(self, kind: DropKind) -> bool {
        match kind {
            DropKind::Adsb => self == Self::SiteBackfilled,
            DropKind::Drones => self == Self::Loaded,
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::FailedConversion | Self::FailedLoad | Self::FailedBackfill
        )
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Placed,
    Planned,
    SkippedUnresolvedSite,
    SkippedBadName,
    DestinationExists,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub source: String,
    pub kind: DropKind,
    pub site: Option<String>,
    pub outcome: ImportOutcome,
    pub chunks_total: Option<usize>,
    pub chunks_loaded: usize,
    pub failed_chunk: Option<usize>,
    pub rows: Option<u64>,
    pub deleted: bool,
    pub detail: Option<String>,
}

impl FileReport {
    pub fn new(source: &Path, kind: DropKind, outcome: ImportOutcome) -> Self {
        Self {
            source: source.display().to_string(),
            kind,
            site: None,
            outcome,
            chunks_total: None,
            chunks_loaded: 0,
            failed_chunk: None,
            rows: None,
            deleted: false,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub kind: DropKind,
    pub started_at: String,
    pub finished_at: String,
    pub dry_run: bool,
    pub delete_requested: bool,
    pub chunk_size: usize,
    pub pacing_ms: u64,
    pub counts: ImportCounts,
    pub files: Vec<FileReport>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportCounts {
    pub files_seen: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub deleted: usize,
    pub chunks_loaded: usize,
}

impl ImportCounts {
    pub fn tally(reports: &[FileReport]) -> Self {
        let mut counts = Self {
            files_seen: reports.len(),
            ..Self::default()
        };
        for report in reports {
            if report.outcome.is_terminal_success(report.kind) {
                counts.succeeded += 1;
            } else if report.outcome.is_failure() {
                counts.failed += 1;
            } else {
                counts.skipped += 1;
            }
            if report.deleted {
                counts.deleted += 1;
            }
            counts.chunks_loaded += report.chunks_loaded;
        }
        counts
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub source: String,
    pub target: Option<String>,
    pub outcome: DispatchOutcome,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub kind: DropKind,
    pub started_at: String,
    pub finished_at: String,
    pub dry_run: bool,
    pub files: Vec<DispatchReport>,
}
