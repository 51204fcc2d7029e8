//! Hive layout of the lake:
//! `<root>/<kind>/[site=<id>/]year=<YYYY>/month=<MM>/<original-filename>`.
//! Downstream readers depend on this shape bit for bit.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{DropError, DropResult};
use crate::model::{DropKind, ParsedIdentity};
use crate::sites::SiteRegistry;
use crate::util::fresh_token;

pub struct PartitionRouter<'a> {
    root: PathBuf,
    registry: &'a SiteRegistry,
}

impl<'a> PartitionRouter<'a> {
    pub fn new(root: &Path, registry: &'a SiteRegistry) -> Self {
        Self {
            root: root.to_path_buf(),
            registry,
        }
    }

    /// Pure: the same identity always routes to the same directory.
    pub fn route(&self, kind: DropKind, identity: &ParsedIdentity) -> DropResult<PathBuf> {
        let site = match (kind, identity.site_token.as_deref()) {
            (DropKind::Adsb, Some(token)) => Some(self.registry.resolve(token)?),
            (DropKind::Adsb, None) => return Err(DropError::SiteNotFound(String::new())),
            (DropKind::Drones, _) => None,
        };
        Ok(partition_dir(
            &self.root,
            kind,
            site,
            identity.year,
            identity.month,
        ))
    }

    /// Moves `source` into `target_dir` under its own name. Never
    /// overwrites; in dry-run only the target is computed.
    pub fn place(&self, source: &Path, target_dir: &Path, dry_run: bool) -> DropResult<PathBuf> {
        let name = source
            .file_name()
            .ok_or_else(|| DropError::UnsupportedFormat(source.to_path_buf()))?;
        let target = target_dir.join(name);

        if target.exists() {
            return Err(DropError::DestinationExists(target));
        }

        info!(source = %source.display(), target = %target.display(), dry_run, "placing drop");
        if dry_run {
            return Ok(target);
        }

        fs::create_dir_all(target_dir).map_err(|source| {
            DropError::io(
                format!("failed to create partition {}", target_dir.display()),
                source,
            )
        })?;
        move_without_clobber(source, &target)?;
        Ok(target)
    }
}

pub fn partition_dir(
    root: &Path,
    kind: DropKind,
    site: Option<&str>,
    year: i32,
    month: u32,
) -> PathBuf {
    let mut dir = root.join(kind.as_str());
    if let Some(site) = site {
        dir.push(format!("site={site}"));
    }
    dir.push(format!("year={year:04}"));
    dir.push(format!("month={month:02}"));
    dir
}

/// A hard link fails instead of replacing an existing target, which makes
/// the no-clobber check atomic; the source is unlinked afterwards. Across
/// devices the bytes are staged under a hidden name first so a partial
/// copy never appears under the final name.
fn move_without_clobber(source: &Path, target: &Path) -> DropResult<()> {
    match fs::hard_link(source, target) {
        Ok(()) => remove_source(source),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            Err(DropError::DestinationExists(target.to_path_buf()))
        }
        Err(err) if err.kind() == ErrorKind::CrossesDevices => copy_across_devices(source, target),
        Err(err) => {
            debug!(error = %err, "hard link unavailable, falling back to rename");
            if target.exists() {
                return Err(DropError::DestinationExists(target.to_path_buf()));
            }
            fs::rename(source, target).map_err(|err| {
                DropError::io(
                    format!("failed to move {} to {}", source.display(), target.display()),
                    err,
                )
            })
        }
    }
}

fn copy_across_devices(source: &Path, target: &Path) -> DropResult<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let name = target
        .file_name()
        .map(|value| value.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = dir.join(format!(".{name}.partial-{}", fresh_token()));

    fs::copy(source, &staging).map_err(|err| {
        let _ = fs::remove_file(&staging);
        DropError::io(format!("failed to copy {}", source.display()), err)
    })?;

    let linked = fs::hard_link(&staging, target);
    let _ = fs::remove_file(&staging);
    match linked {
        Ok(()) => remove_source(source),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            Err(DropError::DestinationExists(target.to_path_buf()))
        }
        Err(err) => Err(DropError::io(
            format!("failed to publish {}", target.display()),
            err,
        )),
    }
}

fn remove_source(source: &Path) -> DropResult<()> {
    fs::remove_file(source)
        .map_err(|err| DropError::io(format!("failed to unlink {}", source.display()), err))
}
