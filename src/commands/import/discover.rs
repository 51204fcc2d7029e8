use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::model::DropKind;

const DRONE_PREFIX: &str = "drones-";

/// Expands the operator's arguments into a sorted list of candidate files.
/// Directories contribute their direct entries, or their whole tree with
/// `recursive`. Hidden entries are never candidates, and symlinked
/// directories below an input are not descended into.
pub fn expand_inputs(inputs: &[PathBuf], recursive: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            collect_dir(input, recursive, &mut files)?;
        } else if input.exists() {
            files.push(input.clone());
        } else {
            warn!(path = %input.display(), "input does not exist");
        }
    }
    files.sort();
    files.dedup();
    debug!(count = files.len(), "discovered input files");
    Ok(files)
}

fn collect_dir(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        let path = entry.path();
        if is_hidden(&path) {
            continue;
        }
        let file_type = entry
            .file_type()
            .with_context(|| format!("failed to stat {}", path.display()))?;
        if file_type.is_dir() {
            if recursive {
                collect_dir(&path, recursive, out)?;
            }
        } else if file_type.is_symlink() && path.is_dir() {
            debug!(path = %path.display(), "not following directory symlink");
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

/// Drone drops are recognized by prefix; ADS-B takes everything else.
pub fn matches_kind(kind: DropKind, basename: &str) -> bool {
    match kind {
        DropKind::Drones => basename.starts_with(DRONE_PREFIX),
        DropKind::Adsb => !basename.starts_with(DRONE_PREFIX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_prefix_splits_drops() {
        assert!(matches_kind(DropKind::Drones, "drones-2024-03-05.csv.gz"));
        assert!(!matches_kind(DropKind::Adsb, "drones-2024-03-05.csv.gz"));
        assert!(matches_kind(DropKind::Adsb, "Brussels_2024-02-14.csv.gz"));
        assert!(!matches_kind(DropKind::Drones, "Brussels_2024-02-14.csv.gz"));
    }

    #[test]
    fn directories_expand_sorted_and_skip_hidden() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("nested");
        fs::create_dir_all(&nested).expect("nested");
        fs::write(dir.path().join("b_2024-01-02.csv"), "h\n").expect("b");
        fs::write(dir.path().join("a_2024-01-01.csv"), "h\n").expect("a");
        fs::write(dir.path().join(".partial"), "").expect("hidden");
        fs::write(nested.join("c_2024-01-03.csv"), "h\n").expect("c");

        let flat = expand_inputs(&[dir.path().to_path_buf()], false).expect("flat");
        let names: Vec<_> = flat
            .iter()
            .map(|path| path.file_name().expect("name").to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a_2024-01-01.csv", "b_2024-01-02.csv"]);

        let deep = expand_inputs(&[dir.path().to_path_buf()], true).expect("deep");
        assert_eq!(deep.len(), 3);
        assert!(deep.contains(&nested.join("c_2024-01-03.csv")));
    }

    #[cfg(unix)]
    #[test]
    fn recursive_expansion_survives_a_symlink_cycle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("nested");
        fs::create_dir_all(&nested).expect("nested");
        fs::write(dir.path().join("a_2024-01-01.csv"), "h\n").expect("a");
        fs::write(nested.join("c_2024-01-03.csv"), "h\n").expect("c");
        std::os::unix::fs::symlink(dir.path(), nested.join("loop")).expect("symlink");
        std::os::unix::fs::symlink(
            nested.join("c_2024-01-03.csv"),
            dir.path().join("linked_2024-01-04.csv"),
        )
        .expect("file symlink");

        let deep = expand_inputs(&[dir.path().to_path_buf()], true).expect("deep");
        assert_eq!(deep.len(), 3);
        assert!(deep.contains(&dir.path().join("linked_2024-01-04.csv")));
        assert!(!deep.iter().any(|path| path.starts_with(nested.join("loop"))));
    }
}
