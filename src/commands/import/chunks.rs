use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info, warn};

use super::client::bulk_load_invocation;
use super::pipeline::ImportContext;
use crate::error::{DropError, DropResult};

const CHUNK_PREFIX: &str = "chunk-";

/// Waits between consecutive chunk loads. Backpressure on the store, so the
/// interval is honoured exactly, zero included.
pub trait Pacer {
    fn pause(&self, interval: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&self, interval: Duration) {
        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadChunk {
    pub sequence: usize,
    pub path: PathBuf,
    pub rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub header: Vec<String>,
    /// Unknown only in dry-run when the CSV does not exist yet.
    pub rows: Option<u64>,
    pub chunks_total: Option<usize>,
    pub chunks_loaded: usize,
    pub scratch_removed: bool,
}

pub struct ChunkedLoader<'c, 'a> {
    ctx: &'c ImportContext<'a>,
}

impl<'c, 'a> ChunkedLoader<'c, 'a> {
    pub fn new(ctx: &'c ImportContext<'a>) -> Self {
        Self { ctx }
    }

    /// Splits `csv` into header-less chunks under `scratch_dir` and loads
    /// them in order starting at `start_chunk` (1-based). The first failing
    /// chunk stops the file and leaves the scratch directory in place.
    pub fn load(&self, csv: &Path, scratch_dir: &Path, start_chunk: usize) -> DropResult<LoadReport> {
        let settings = self.ctx.settings;
        let start_chunk = start_chunk.max(1);

        if settings.dry_run {
            return self.preview(csv, scratch_dir, start_chunk);
        }

        let (header, chunks) = split_csv(csv, scratch_dir, settings.chunk_size)?;
        let rows: u64 = chunks.iter().map(|chunk| chunk.rows as u64).sum();
        let total = chunks.len();
        info!(
            file = %csv.display(),
            rows,
            chunks = total,
            chunk_size = settings.chunk_size,
            scratch = %scratch_dir.display(),
            "split csv into chunks"
        );

        let mut report = LoadReport {
            header,
            rows: Some(rows),
            chunks_total: Some(total),
            ..LoadReport::default()
        };

        let mut first = true;
        for chunk in chunks.iter().filter(|chunk| chunk.sequence >= start_chunk) {
            if !first {
                self.ctx.pacer.pause(settings.pacing);
            }
            first = false;

            let invocation = bulk_load_invocation(settings, &chunk.path);
            if let Err(detail) = self.ctx.execute(&invocation, "bulk load") {
                error!(
                    file = %csv.display(),
                    chunk = chunk.sequence,
                    total,
                    loaded = report.chunks_loaded,
                    scratch = %scratch_dir.display(),
                    "chunk load failed, remaining chunks not attempted"
                );
                return Err(DropError::FailedLoad {
                    chunk: chunk.sequence,
                    total,
                    file: csv.to_path_buf(),
                    detail,
                });
            }
            report.chunks_loaded += 1;
            info!(chunk = chunk.sequence, total, rows = chunk.rows, "chunk loaded");
        }

        report.scratch_removed = remove_scratch(scratch_dir);
        Ok(report)
    }

    fn preview(&self, csv: &Path, scratch_dir: &Path, start_chunk: usize) -> DropResult<LoadReport> {
        let settings = self.ctx.settings;
        if !csv.exists() {
            let placeholder = scratch_dir.join(format!("{CHUNK_PREFIX}NNNNN.csv"));
            let invocation = bulk_load_invocation(settings, &placeholder);
            info!(
                file = %csv.display(),
                "csv not materialized in dry-run, chunk count unknown"
            );
            let _ = self.ctx.execute(&invocation, "bulk load");
            return Ok(LoadReport::default());
        }

        let (header, rows) = count_records(csv)?;
        let total = chunk_count(rows, settings.chunk_size);
        info!(file = %csv.display(), rows, chunks = total, dry_run = true, "planned chunks");

        let mut first = true;
        for sequence in (1..=total).filter(|sequence| *sequence >= start_chunk) {
            if !first {
                info!(pacing_ms = settings.pacing.as_millis() as u64, dry_run = true, "pause");
            }
            first = false;
            let invocation = bulk_load_invocation(settings, &chunk_path(scratch_dir, sequence));
            let _ = self.ctx.execute(&invocation, "bulk load");
        }

        Ok(LoadReport {
            header,
            rows: Some(rows),
            chunks_total: Some(total),
            chunks_loaded: 0,
            scratch_removed: false,
        })
    }
}

pub fn chunk_count(rows: u64, chunk_size: usize) -> usize {
    rows.div_ceil(chunk_size.max(1) as u64) as usize
}

pub fn chunk_path(scratch_dir: &Path, sequence: usize) -> PathBuf {
    scratch_dir.join(format!("{CHUNK_PREFIX}{sequence:05}.csv"))
}

fn reader_for(csv: &Path) -> DropResult<csv::Reader<fs::File>> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(csv)
        .map_err(|source| DropError::Csv {
            path: csv.to_path_buf(),
            source,
        })
}

fn header_of(reader: &mut csv::Reader<fs::File>, csv: &Path) -> DropResult<Vec<String>> {
    let header = reader.headers().map_err(|source| DropError::Csv {
        path: csv.to_path_buf(),
        source,
    })?;
    Ok(header.iter().map(str::to_string).collect())
}

fn count_records(csv: &Path) -> DropResult<(Vec<String>, u64)> {
    let mut reader = reader_for(csv)?;
    let header = header_of(&mut reader, csv)?;
    let mut record = csv::ByteRecord::new();
    let mut rows = 0_u64;
    loop {
        let more = reader
            .read_byte_record(&mut record)
            .map_err(|source| DropError::Csv {
                path: csv.to_path_buf(),
                source,
            })?;
        if !more {
            break;
        }
        rows += 1;
    }
    Ok((header, rows))
}

/// Streams records into `chunk-NNNNN.csv` files of at most `chunk_size`
/// rows. The header is kept aside, never repeated in a chunk. Chunks from
/// an earlier attempt are replaced.
fn split_csv(
    csv: &Path,
    scratch_dir: &Path,
    chunk_size: usize,
) -> DropResult<(Vec<String>, Vec<LoadChunk>)> {
    fs::create_dir_all(scratch_dir).map_err(|err| {
        DropError::io(
            format!("failed to create scratch {}", scratch_dir.display()),
            err,
        )
    })?;
    clear_stale_chunks(scratch_dir)?;

    let mut reader = reader_for(csv)?;
    let header = header_of(&mut reader, csv)?;
    let csv_error = |source| DropError::Csv {
        path: csv.to_path_buf(),
        source,
    };

    let mut chunks: Vec<LoadChunk> = Vec::new();
    let mut writer: Option<csv::Writer<fs::File>> = None;
    let mut record = csv::ByteRecord::new();

    while reader.read_byte_record(&mut record).map_err(csv_error)? {
        let full = chunks.last().is_none_or(|chunk| chunk.rows >= chunk_size);
        if full {
            if let Some(mut done) = writer.take() {
                done.flush()
                    .map_err(|err| DropError::io("failed to flush chunk", err))?;
            }
            let sequence = chunks.len() + 1;
            let path = chunk_path(scratch_dir, sequence);
            let next = csv::WriterBuilder::new()
                .flexible(true)
                .from_path(&path)
                .map_err(csv_error)?;
            writer = Some(next);
            chunks.push(LoadChunk {
                sequence,
                path,
                rows: 0,
            });
        }

        if let (Some(out), Some(chunk)) = (writer.as_mut(), chunks.last_mut()) {
            out.write_byte_record(&record).map_err(csv_error)?;
            chunk.rows += 1;
        }
    }

    if let Some(mut done) = writer.take() {
        done.flush()
            .map_err(|err| DropError::io("failed to flush chunk", err))?;
    }

    Ok((header, chunks))
}

fn clear_stale_chunks(scratch_dir: &Path) -> DropResult<()> {
    let entries = fs::read_dir(scratch_dir).map_err(|err| {
        DropError::io(format!("failed to read {}", scratch_dir.display()), err)
    })?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(CHUNK_PREFIX) {
            fs::remove_file(entry.path()).map_err(|err| {
                DropError::io(
                    format!("failed to remove stale chunk {}", entry.path().display()),
                    err,
                )
            })?;
        }
    }
    Ok(())
}

fn remove_scratch(scratch_dir: &Path) -> bool {
    match fs::remove_dir_all(scratch_dir) {
        Ok(()) => true,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
        Err(err) => {
            warn!(scratch = %scratch_dir.display(), error = %err, "failed to remove scratch directory");
            false
        }
    }
}
