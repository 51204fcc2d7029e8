use std::path::Path;

use crate::config::ImportSettings;
use crate::runner::Invocation;

/// `<client> [-h host] [-u user] -d <db> [--password ****] -q "<query>"`
pub(super) fn client_invocation(settings: &ImportSettings, query: &str) -> Invocation {
    let credentials = &settings.credentials;
    let mut invocation = Invocation::from_command_line(&settings.client);

    if let Some(host) = &credentials.host {
        invocation = invocation.arg("-h").arg(host);
    }
    if let Some(user) = &credentials.user {
        invocation = invocation.arg("-u").arg(user);
    }
    invocation = invocation.arg("-d").arg(&settings.database);
    if let Some(password) = &credentials.password {
        invocation = invocation.arg("--password").secret_arg(password);
    }

    invocation.arg("-q").arg(query)
}

pub(super) fn insert_query(table: &str) -> String {
    format!("INSERT INTO {table} FORMAT CSV")
}

pub(super) fn bulk_load_invocation(settings: &ImportSettings, chunk: &Path) -> Invocation {
    client_invocation(settings, &insert_query(&settings.table)).stdin_from(chunk)
}

/// Only rows still carrying the sentinel are touched, so rows another
/// file already corrected keep their site.
pub(super) fn backfill_query(
    database: &str,
    table: &str,
    site_id: &str,
    sentinel: &str,
) -> String {
    let site_id = site_id.replace('\\', "\\\\").replace('\'', "\\'");
    format!("ALTER TABLE {database}.{table} UPDATE site = '{site_id}' WHERE site = {sentinel}")
}
