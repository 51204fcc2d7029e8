use std::collections::BTreeMap;

use anyhow::Result;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::import::ledger::{ImportLedger, LedgerEntry};
use crate::config::LakeLayout;

pub fn run(args: StatusArgs) -> Result<()> {
    let (layout, _) = LakeLayout::resolve(&args.lake)?;
    let ledger_path = &layout.ledger_path;

    info!(datalake = %layout.datalake.display(), "status requested");

    if !ledger_path.exists() {
        warn!(path = %ledger_path.display(), "import ledger missing");
        return Ok(());
    }

    let ledger = ImportLedger::open_read_only(ledger_path)?;
    let entries = ledger.list(args.kind, args.failed_only)?;

    for (outcome, count) in outcome_counts(&entries) {
        info!(outcome, count, "ledger outcomes");
    }

    for entry in &entries {
        if entry.outcome.is_failure() || args.failed_only {
            warn!(
                kind = %entry.kind,
                drop = %entry.drop_key,
                outcome = entry.outcome.as_str(),
                failed_chunk = ?entry.failed_chunk,
                chunks_loaded = entry.chunks_loaded,
                chunks_total = ?entry.chunks_total,
                run_id = %entry.run_id,
                updated_at = %entry.updated_at,
                detail = %entry.detail.as_deref().unwrap_or_default(),
                "needs attention"
            );
        }
    }

    info!(path = %ledger_path.display(), entries = entries.len(), "ledger status");
    Ok(())
}

fn outcome_counts(entries: &[LedgerEntry]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for entry in entries {
        *counts.entry(entry.outcome.as_str()).or_insert(0) += 1;
    }
    counts
}
