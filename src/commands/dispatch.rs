use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::cli::DispatchArgs;
use crate::config::LakeLayout;
use crate::error::DropError;
use crate::filename::FilenameParser;
use crate::model::{DispatchOutcome, DispatchReport, DispatchRunManifest, DropKind};
use crate::partition::PartitionRouter;
use crate::sites::SiteRegistry;
use crate::util::{ensure_writable_directory, now_utc_string, utc_compact_string, write_json_pretty};

const MANIFEST_VERSION: u32 = 1;

pub fn run(args: DispatchArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let (layout, _) = LakeLayout::resolve(&args.lake)?;
    let kind = if args.drones {
        DropKind::Drones
    } else {
        DropKind::Adsb
    };
    let registry = if kind.needs_site() {
        SiteRegistry::load(&layout.sites_path)?
    } else {
        SiteRegistry::default()
    };
    let parser = FilenameParser::new()?;

    info!(
        data_root = %layout.data_root.display(),
        kind = %kind,
        files = args.files.len(),
        dry_run = args.dry_run,
        "dispatching drops"
    );
    let reports = dispatch_files(
        &layout.data_root,
        &registry,
        &parser,
        kind,
        &args.files,
        args.dry_run,
    );

    let failed = reports
        .iter()
        .filter(|report| report.outcome == DispatchOutcome::Failed)
        .count();
    let moved = reports
        .iter()
        .filter(|report| {
            matches!(
                report.outcome,
                DispatchOutcome::Placed | DispatchOutcome::Planned
            )
        })
        .count();
    info!(
        files = reports.len(),
        moved,
        skipped = reports.len() - moved - failed,
        failed,
        dry_run = args.dry_run,
        "dispatch finished"
    );

    let total = reports.len();
    if !args.dry_run {
        let manifest = DispatchRunManifest {
            manifest_version: MANIFEST_VERSION,
            run_id: format!("dispatch-{}-{}", kind, utc_compact_string(started_ts)),
            kind,
            started_at,
            finished_at: now_utc_string(),
            dry_run: args.dry_run,
            files: reports,
        };
        ensure_writable_directory(&layout.report_dir)?;
        let manifest_path = layout.report_dir.join(format!(
            "dispatch_{}_{}.json",
            kind,
            utc_compact_string(started_ts)
        ));
        write_json_pretty(&manifest_path, &manifest)?;
        info!(path = %manifest_path.display(), "wrote dispatch manifest");
    }

    if failed > 0 {
        bail!("{failed} of {total} drops could not be moved");
    }
    Ok(())
}

pub fn dispatch_files(
    data_root: &Path,
    registry: &SiteRegistry,
    parser: &FilenameParser,
    kind: DropKind,
    files: &[PathBuf],
    dry_run: bool,
) -> Vec<DispatchReport> {
    let router = PartitionRouter::new(data_root, registry);
    files
        .iter()
        .map(|file| dispatch_one(&router, parser, kind, file, dry_run))
        .collect()
}

fn dispatch_one(
    router: &PartitionRouter<'_>,
    parser: &FilenameParser,
    kind: DropKind,
    file: &Path,
    dry_run: bool,
) -> DispatchReport {
    let mut report = DispatchReport {
        source: file.display().to_string(),
        target: None,
        outcome: DispatchOutcome::Failed,
        detail: None,
    };

    let name = file
        .file_name()
        .map(|value| value.to_string_lossy().into_owned())
        .unwrap_or_default();

    let routed = parser
        .parse(kind, &name)
        .and_then(|identity| router.route(kind, &identity))
        .and_then(|target_dir| router.place(file, &target_dir, dry_run));

    match routed {
        Ok(target) => {
            report.outcome = if dry_run {
                DispatchOutcome::Planned
            } else {
                DispatchOutcome::Placed
            };
            report.target = Some(target.display().to_string());
        }
        Err(err) => {
            report.outcome = match &err {
                DropError::PatternMismatch { .. } | DropError::InvalidDate { .. } => {
                    DispatchOutcome::SkippedBadName
                }
                DropError::SiteNotFound(_) => DispatchOutcome::SkippedUnresolvedSite,
                DropError::DestinationExists(target) => {
                    report.target = Some(target.display().to_string());
                    DispatchOutcome::DestinationExists
                }
                _ => DispatchOutcome::Failed,
            };
            if report.outcome == DispatchOutcome::Failed {
                error!(file = %file.display(), error = %err, "failed to move drop");
            } else {
                warn!(file = %file.display(), error = %err, "drop left in place");
            }
            report.detail = Some(err.to_string());
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn registry() -> SiteRegistry {
        SiteRegistry::from_pairs([("Brussels", "BRU"), ("Gatwick", "LON"), ("London", "LON")])
    }

    #[test]
    fn drops_land_in_their_partition() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inbox = dir.path().join("inbox");
        let lake = dir.path().join("data");
        fs::create_dir_all(&inbox).expect("inbox");
        let drop = inbox.join("Gatwick_2024-11-03.parquet");
        fs::write(&drop, b"PAR1").expect("drop");

        let parser = FilenameParser::new().expect("parser");
        let reports = dispatch_files(
            &lake,
            &registry(),
            &parser,
            DropKind::Adsb,
            std::slice::from_ref(&drop),
            false,
        );

        let expected = lake.join("adsb/site=LON/year=2024/month=11/Gatwick_2024-11-03.parquet");
        assert_eq!(reports[0].outcome, DispatchOutcome::Placed);
        assert_eq!(reports[0].target.as_deref(), Some(expected.display().to_string().as_str()));
        assert!(expected.exists());
        assert!(!drop.exists());
    }

    #[test]
    fn skipped_drops_stay_where_they_are() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lake = dir.path().join("data");
        let unknown = dir.path().join("Unknown_2024-02-14.parquet");
        let malformed = dir.path().join("Brussels-2024-02-14.parquet");
        let existing_target = lake.join("adsb/site=BRU/year=2024/month=02");
        let duplicate = dir.path().join("Brussels_2024-02-14.parquet");
        for file in [&unknown, &malformed, &duplicate] {
            fs::write(file, b"PAR1").expect("drop");
        }
        fs::create_dir_all(&existing_target).expect("partition");
        fs::write(existing_target.join("Brussels_2024-02-14.parquet"), b"old").expect("existing");

        let parser = FilenameParser::new().expect("parser");
        let reports = dispatch_files(
            &lake,
            &registry(),
            &parser,
            DropKind::Adsb,
            &[unknown.clone(), malformed.clone(), duplicate.clone()],
            false,
        );

        let outcomes: Vec<_> = reports.iter().map(|report| report.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                DispatchOutcome::SkippedUnresolvedSite,
                DispatchOutcome::SkippedBadName,
                DispatchOutcome::DestinationExists,
            ]
        );
        assert!(unknown.exists() && malformed.exists() && duplicate.exists());
        assert_eq!(
            fs::read(existing_target.join("Brussels_2024-02-14.parquet")).expect("existing"),
            b"old"
        );
    }

    fn lake_args(datalake: &Path, drones: bool, dry_run: bool, files: Vec<PathBuf>) -> DispatchArgs {
        DispatchArgs {
            lake: crate::cli::LakeArgs {
                datalake: Some(datalake.to_path_buf()),
                config: None,
                sites: None,
            },
            drones,
            dry_run,
            files,
        }
    }

    #[test]
    fn real_dispatch_writes_a_manifest_under_var_reports() {
        let dir = tempfile::tempdir().expect("tempdir");
        let datalake = dir.path().join("lake");
        fs::create_dir_all(datalake.join("etc")).expect("etc");
        fs::write(datalake.join("etc/sites.csv"), "basename,id\nBrussels,BRU\n").expect("sites");
        let drop = dir.path().join("Brussels_2024-02-14.parquet");
        let unknown = dir.path().join("Unknown_2024-02-14.parquet");
        fs::write(&drop, b"PAR1").expect("drop");
        fs::write(&unknown, b"PAR1").expect("drop");

        run(lake_args(&datalake, false, false, vec![drop.clone(), unknown.clone()]))
            .expect("dispatch succeeds");

        assert!(
            datalake
                .join("data/adsb/site=BRU/year=2024/month=02/Brussels_2024-02-14.parquet")
                .exists()
        );
        let manifests: Vec<PathBuf> = fs::read_dir(datalake.join("var/reports"))
            .expect("report dir")
            .flatten()
            .map(|entry| entry.path())
            .collect();
        assert_eq!(manifests.len(), 1);
        let name = manifests[0].file_name().expect("name").to_string_lossy().into_owned();
        assert!(name.starts_with("dispatch_adsb_") && name.ends_with(".json"));

        let body: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&manifests[0]).expect("read")).expect("json");
        assert_eq!(body["kind"], "adsb");
        assert_eq!(body["dry_run"], false);
        assert_eq!(body["files"].as_array().expect("files").len(), 2);
    }

    #[test]
    fn dry_run_dispatch_writes_no_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let datalake = dir.path().join("lake");
        let drop = dir.path().join("drones-2024-03-05.parquet");
        fs::write(&drop, b"PAR1").expect("drop");

        run(lake_args(&datalake, true, true, vec![drop.clone()])).expect("dry run succeeds");

        assert!(drop.exists());
        assert!(!datalake.exists());
    }

    #[test]
    fn dry_run_only_plans() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lake = dir.path().join("data");
        let drop = dir.path().join("drones-2024-03-05.parquet");
        fs::write(&drop, b"PAR1").expect("drop");

        let parser = FilenameParser::new().expect("parser");
        let reports = dispatch_files(
            &lake,
            &SiteRegistry::default(),
            &parser,
            DropKind::Drones,
            std::slice::from_ref(&drop),
            true,
        );

        assert_eq!(reports[0].outcome, DispatchOutcome::Planned);
        assert_eq!(
            reports[0].target.as_deref(),
            Some(
                lake.join("drones/year=2024/month=03/drones-2024-03-05.parquet")
                    .display()
                    .to_string()
                    .as_str()
            )
        );
        assert!(drop.exists());
        assert!(!lake.exists());
    }
}
