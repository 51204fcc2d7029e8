use std::path::PathBuf;

use thiserror::Error;

pub type DropResult<T> = std::result::Result<T, DropError>;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConversionStage {
    Decompress,
    Convert,
}

impl ConversionStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Decompress => "decompress",
            Self::Convert => "convert",
        }
    }
}

impl std::fmt::Display for ConversionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures local to one drop. None of these abort a run.
#[derive(Debug, Error)]
pub enum DropError {
    #[error("filename does not match the {kind} pattern: {name}")]
    PatternMismatch { kind: &'static str, name: String },

    #[error("invalid date {year}-{month}-{day} in {name}")]
    InvalidDate {
        name: String,
        year: String,
        month: String,
        day: String,
    },

    #[error("site {0} not found in registry")]
    SiteNotFound(String),

    #[error("{stage} failed for {}: {detail}", path.display())]
    ConversionFailed {
        stage: ConversionStage,
        path: PathBuf,
        detail: String,
    },

    #[error("unsupported format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("load of chunk {chunk}/{total} of {} failed: {detail}", file.display())]
    FailedLoad {
        chunk: usize,
        total: usize,
        file: PathBuf,
        detail: String,
    },

    #[error("site backfill to {site} failed: {detail}")]
    FailedBackfill { site: String, detail: String },

    #[error("destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("failed to run {program}: {source}")]
    Command {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl DropError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
