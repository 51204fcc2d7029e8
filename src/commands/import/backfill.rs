use tracing::{error, info};

use super::client::{backfill_query, client_invocation};
use super::pipeline::ImportContext;
use crate::error::{DropError, DropResult};

/// Stamps rows loaded with the sentinel site with the drop's canonical id.
/// Rows stay loaded when this fails.
pub fn backfill(ctx: &ImportContext<'_>, site_id: &str) -> DropResult<()> {
    let settings = ctx.settings;
    let query = backfill_query(&settings.database, &settings.table, site_id, &settings.sentinel);
    let invocation = client_invocation(settings, &query);

    match ctx.execute(&invocation, "site backfill") {
        Ok(()) => {
            info!(site = site_id, table = %settings.table, "site backfilled");
            Ok(())
        }
        Err(detail) => {
            error!(site = site_id, table = %settings.table, detail = %detail, "site backfill failed");
            Err(DropError::FailedBackfill {
                site: site_id.to_string(),
                detail,
            })
        }
    }
}
