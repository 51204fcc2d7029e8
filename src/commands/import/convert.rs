use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::pipeline::ImportContext;
use crate::error::{ConversionStage, DropError, DropResult};
use crate::model::{Compression, DropFormat, RawDrop};
use crate::runner::Invocation;
use crate::util::fresh_token;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CsvOrigin {
    Direct,
    Decompressed,
    SiblingCsv,
    Converted,
}

/// The CSV the loader reads, whatever the drop arrived as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalCsv {
    pub path: PathBuf,
    pub origin: CsvOrigin,
    /// Lives in the scratch directory and goes away with it.
    pub temporary: bool,
}

/// Decompresses and converts `drop` in place until a CSV exists. The drop's
/// path follows the artifact on disk.
pub fn normalize(
    ctx: &ImportContext<'_>,
    drop: &mut RawDrop,
    scratch_dir: &Path,
) -> DropResult<CanonicalCsv> {
    if drop.format == DropFormat::Other {
        return Err(DropError::UnsupportedFormat(drop.path.clone()));
    }

    let mut decompressed = false;
    if drop.compression == Compression::Gzip {
        decompress(ctx, drop)?;
        decompressed = true;
    }

    match drop.format {
        DropFormat::Csv => Ok(CanonicalCsv {
            path: drop.path.clone(),
            origin: if decompressed {
                CsvOrigin::Decompressed
            } else {
                CsvOrigin::Direct
            },
            temporary: false,
        }),
        DropFormat::Parquet => parquet_to_csv(ctx, drop, scratch_dir),
        DropFormat::Other => Err(DropError::UnsupportedFormat(drop.path.clone())),
    }
}

fn decompress(ctx: &ImportContext<'_>, drop: &mut RawDrop) -> DropResult<()> {
    let compressed = drop.path.clone();
    let target = strip_gz(&compressed);
    let invocation = Invocation::from_command_line(&ctx.settings.decompressor).path_arg(&compressed);

    ctx.execute(&invocation, "decompress")
        .map_err(|detail| conversion_failed(ConversionStage::Decompress, &compressed, detail))?;

    if !ctx.settings.dry_run && !target.exists() {
        return Err(conversion_failed(
            ConversionStage::Decompress,
            &compressed,
            format!("{} was not produced", target.display()),
        ));
    }

    info!(from = %compressed.display(), to = %target.display(), "decompressed drop");
    drop.path = target;
    drop.compression = Compression::None;
    Ok(())
}

fn parquet_to_csv(
    ctx: &ImportContext<'_>,
    drop: &RawDrop,
    scratch_dir: &Path,
) -> DropResult<CanonicalCsv> {
    let sibling = drop.path.with_extension("csv");
    if sibling.exists() {
        warn!(
            parquet = %drop.path.display(),
            csv = %sibling.display(),
            "both parquet and csv exist, using the csv"
        );
        return Ok(CanonicalCsv {
            path: sibling,
            origin: CsvOrigin::SiblingCsv,
            temporary: false,
        });
    }

    let output = scratch_dir.join(format!(
        "{}-{}.csv",
        drop.identity_stem(),
        fresh_token()
    ));
    if !ctx.settings.dry_run {
        fs::create_dir_all(scratch_dir).map_err(|err| {
            DropError::io(
                format!("failed to create scratch {}", scratch_dir.display()),
                err,
            )
        })?;
    }

    let invocation = Invocation::from_command_line(&ctx.settings.converter)
        .arg("-s")
        .path_arg(&drop.path)
        .path_arg(&output);

    ctx.execute(&invocation, "convert")
        .map_err(|detail| conversion_failed(ConversionStage::Convert, &drop.path, detail))?;

    if !ctx.settings.dry_run && !output.exists() {
        return Err(conversion_failed(
            ConversionStage::Convert,
            &drop.path,
            "converter exited successfully but produced no output".to_string(),
        ));
    }

    Ok(CanonicalCsv {
        path: output,
        origin: CsvOrigin::Converted,
        temporary: true,
    })
}

fn strip_gz(path: &Path) -> PathBuf {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("gz") => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}

fn conversion_failed(stage: ConversionStage, path: &Path, detail: String) -> DropError {
    DropError::ConversionFailed {
        stage,
        path: path.to_path_buf(),
        detail,
    }
}
