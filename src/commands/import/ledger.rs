use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};
use tracing::{debug, warn};

use crate::model::{DropKind, ImportOutcome};

const LEDGER_SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub kind: DropKind,
    pub drop_key: String,
    pub source_path: String,
    pub site_id: Option<String>,
    pub outcome: ImportOutcome,
    pub csv_sha256: Option<String>,
    pub chunk_size: Option<usize>,
    pub chunks_total: Option<usize>,
    pub chunks_loaded: usize,
    pub failed_chunk: Option<usize>,
    pub detail: Option<String>,
    pub deleted: bool,
    pub run_id: String,
    pub updated_at: String,
}

/// Per-drop outcomes across runs, keyed by kind and identity stem.
pub struct ImportLedger {
    connection: Option<Connection>,
    writable: bool,
}

impl ImportLedger {
    pub fn open(path: &Path) -> Result<Self> {
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open ledger {}", path.display()))?;
        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to set journal_mode=WAL")?;
        connection
            .pragma_update(None, "synchronous", "NORMAL")
            .context("failed to set synchronous=NORMAL")?;
        ensure_schema(&connection)?;
        Ok(Self {
            connection: Some(connection),
            writable: true,
        })
    }

    /// Dry-run view: reads decisions from an existing ledger and leaves the
    /// lake byte-for-byte untouched. An immutable open skips the WAL index,
    /// so no `-shm` or `-wal` sidecar is created; that is only sound when no
    /// WAL is pending, otherwise the ledger is disabled for the run.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no ledger yet");
            return Ok(Self::disabled());
        }
        if wal_sidecar(path).exists() {
            warn!(
                path = %path.display(),
                "ledger has an uncheckpointed WAL, skip/resume decisions cannot be previewed"
            );
            return Ok(Self::disabled());
        }
        let connection = Connection::open_with_flags(
            immutable_uri(path),
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open ledger read-only {}", path.display()))?;
        Ok(Self {
            connection: Some(connection),
            writable: false,
        })
    }

    pub fn disabled() -> Self {
        Self {
            connection: None,
            writable: false,
        }
    }

    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory ledger")?;
        ensure_schema(&connection)?;
        Ok(Self {
            connection: Some(connection),
            writable: true,
        })
    }

    pub fn get(&self, kind: DropKind, drop_key: &str) -> Result<Option<LedgerEntry>> {
        let Some(connection) = &self.connection else {
            return Ok(None);
        };
        connection
            .query_row(
                "SELECT kind, drop_key, source_path, site_id, outcome, csv_sha256, chunk_size,
                        chunks_total, chunks_loaded, failed_chunk, detail, deleted, run_id, updated_at
                 FROM imports WHERE kind = ?1 AND drop_key = ?2",
                params![kind.as_str(), drop_key],
                entry_from_row,
            )
            .optional()
            .with_context(|| format!("failed to read ledger entry for {drop_key}"))
    }

    pub fn record(&self, entry: &LedgerEntry) -> Result<()> {
        let Some(connection) = &self.connection else {
            return Ok(());
        };
        if !self.writable {
            return Ok(());
        }
        connection
            .execute(
                "INSERT INTO imports (
                    kind, drop_key, source_path, site_id, outcome, csv_sha256, chunk_size,
                    chunks_total, chunks_loaded, failed_chunk, detail, deleted, run_id, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(kind, drop_key) DO UPDATE SET
                    source_path = excluded.source_path,
                    site_id = excluded.site_id,
                    outcome = excluded.outcome,
                    csv_sha256 = excluded.csv_sha256,
                    chunk_size = excluded.chunk_size,
                    chunks_total = excluded.chunks_total,
                    chunks_loaded = excluded.chunks_loaded,
                    failed_chunk = excluded.failed_chunk,
                    detail = excluded.detail,
                    deleted = excluded.deleted,
                    run_id = excluded.run_id,
                    updated_at = excluded.updated_at",
                params![
                    entry.kind.as_str(),
                    entry.drop_key,
                    entry.source_path,
                    entry.site_id,
                    entry.outcome.as_str(),
                    entry.csv_sha256,
                    entry.chunk_size.map(|value| value as i64),
                    entry.chunks_total.map(|value| value as i64),
                    entry.chunks_loaded as i64,
                    entry.failed_chunk.map(|value| value as i64),
                    entry.detail,
                    entry.deleted,
                    entry.run_id,
                    entry.updated_at,
                ],
            )
            .with_context(|| format!("failed to record ledger entry for {}", entry.drop_key))?;
        Ok(())
    }

    pub fn list(&self, kind: Option<DropKind>, failed_only: bool) -> Result<Vec<LedgerEntry>> {
        let Some(connection) = &self.connection else {
            return Ok(Vec::new());
        };
        let mut statement = connection
            .prepare(
                "SELECT kind, drop_key, source_path, site_id, outcome, csv_sha256, chunk_size,
                        chunks_total, chunks_loaded, failed_chunk, detail, deleted, run_id, updated_at
                 FROM imports
                 WHERE (?1 IS NULL OR kind = ?1)
                 ORDER BY kind, drop_key",
            )
            .context("failed to prepare ledger listing")?;
        let rows = statement
            .query_map(params![kind.map(DropKind::as_str)], entry_from_row)
            .context("failed to list ledger entries")?;

        let mut entries = Vec::new();
        for row in rows {
            let entry = row.context("failed to decode ledger row")?;
            if failed_only && !entry.outcome.is_failure() {
                continue;
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn is_writable(&self) -> bool {
        self.connection.is_some() && self.writable
    }
}

fn wal_sidecar(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push("-wal");
    PathBuf::from(name)
}

fn immutable_uri(path: &Path) -> String {
    let mut uri = String::from("file:");
    for ch in path.to_string_lossy().chars() {
        match ch {
            '%' => uri.push_str("%25"),
            '?' => uri.push_str("%3f"),
            '#' => uri.push_str("%23"),
            _ => uri.push(ch),
        }
    }
    uri.push_str("?mode=ro&immutable=1");
    uri
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS imports (
              kind TEXT NOT NULL,
              drop_key TEXT NOT NULL,
              source_path TEXT NOT NULL,
              site_id TEXT,
              outcome TEXT NOT NULL,
              csv_sha256 TEXT,
              chunk_size INTEGER,
              chunks_total INTEGER,
              chunks_loaded INTEGER NOT NULL DEFAULT 0,
              failed_chunk INTEGER,
              detail TEXT,
              deleted INTEGER NOT NULL DEFAULT 0,
              run_id TEXT NOT NULL,
              updated_at TEXT NOT NULL,
              PRIMARY KEY(kind, drop_key)
            );

            CREATE INDEX IF NOT EXISTS idx_imports_outcome ON imports(outcome);
            ",
        )
        .context("failed to create ledger schema")?;
    connection
        .execute(
            "INSERT INTO metadata(key, value) VALUES ('schema_version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![LEDGER_SCHEMA_VERSION],
        )
        .context("failed to write ledger schema version")?;
    Ok(())
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let kind_label: String = row.get(0)?;
    let outcome_label: String = row.get(4)?;
    let kind = DropKind::parse_label(&kind_label).ok_or_else(|| invalid_label(0, &kind_label))?;
    let outcome =
        ImportOutcome::parse_label(&outcome_label).ok_or_else(|| invalid_label(4, &outcome_label))?;

    Ok(LedgerEntry {
        kind,
        drop_key: row.get(1)?,
        source_path: row.get(2)?,
        site_id: row.get(3)?,
        outcome,
        csv_sha256: row.get(5)?,
        chunk_size: row.get::<_, Option<i64>>(6)?.map(|value| value as usize),
        chunks_total: row.get::<_, Option<i64>>(7)?.map(|value| value as usize),
        chunks_loaded: row.get::<_, i64>(8)? as usize,
        failed_chunk: row.get::<_, Option<i64>>(9)?.map(|value| value as usize),
        detail: row.get(10)?,
        deleted: row.get(11)?,
        run_id: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn invalid_label(column: usize, label: &str) -> rusqlite::Error {
    warn!(column, label, "unrecognized label in ledger");
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        format!("unrecognized label {label}").into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, outcome: ImportOutcome) -> LedgerEntry {
        LedgerEntry {
            kind: DropKind::Adsb,
            drop_key: key.to_string(),
            source_path: format!("/drops/{key}.csv"),
            site_id: Some("BRU".to_string()),
            outcome,
            csv_sha256: Some("abc".to_string()),
            chunk_size: Some(5),
            chunks_total: Some(3),
            chunks_loaded: 1,
            failed_chunk: Some(2),
            detail: None,
            deleted: false,
            run_id: "run-1".to_string(),
            updated_at: "2024-02-14T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn record_upserts_by_kind_and_key() {
        let ledger = ImportLedger::open_in_memory().expect("ledger");
        ledger
            .record(&entry("Brussels_2024-02-14", ImportOutcome::FailedLoad))
            .expect("first record");

        let mut done = entry("Brussels_2024-02-14", ImportOutcome::SiteBackfilled);
        done.failed_chunk = None;
        done.chunks_loaded = 3;
        ledger.record(&done).expect("second record");

        let stored = ledger
            .get(DropKind::Adsb, "Brussels_2024-02-14")
            .expect("get")
            .expect("entry exists");
        assert_eq!(stored, done);
        assert!(
            ledger
                .get(DropKind::Drones, "Brussels_2024-02-14")
                .expect("get")
                .is_none()
        );
    }

    #[test]
    fn list_filters_failures() {
        let ledger = ImportLedger::open_in_memory().expect("ledger");
        ledger
            .record(&entry("a_2024-01-01", ImportOutcome::SiteBackfilled))
            .expect("record");
        ledger
            .record(&entry("b_2024-01-01", ImportOutcome::FailedBackfill))
            .expect("record");

        assert_eq!(ledger.list(None, false).expect("list").len(), 2);
        let failed = ledger.list(Some(DropKind::Adsb), true).expect("list");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].drop_key, "b_2024-01-01");
        assert!(ledger.list(Some(DropKind::Drones), false).expect("list").is_empty());
    }

    #[test]
    fn disabled_and_read_only_ledgers_never_write() {
        let disabled = ImportLedger::disabled();
        disabled
            .record(&entry("a_2024-01-01", ImportOutcome::Loaded))
            .expect("no-op");
        assert!(disabled.get(DropKind::Adsb, "a_2024-01-01").expect("get").is_none());

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger.sqlite");
        assert!(!ImportLedger::open_read_only(&path).expect("open").is_writable());
        assert!(!path.exists());

        ImportLedger::open(&path).expect("create");
        let read_only = ImportLedger::open_read_only(&path).expect("open");
        read_only
            .record(&entry("a_2024-01-01", ImportOutcome::Loaded))
            .expect("no-op");
        assert!(read_only.get(DropKind::Adsb, "a_2024-01-01").expect("get").is_none());
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .expect("read_dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn read_only_open_leaves_no_sidecars() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("import-ledger.sqlite");
        {
            let ledger = ImportLedger::open(&path).expect("create");
            ledger
                .record(&entry("a_2024-01-01", ImportOutcome::SiteBackfilled))
                .expect("record");
        }
        let before = listing(dir.path());
        assert_eq!(before, vec!["import-ledger.sqlite".to_string()]);

        {
            let read_only = ImportLedger::open_read_only(&path).expect("open");
            let stored = read_only
                .get(DropKind::Adsb, "a_2024-01-01")
                .expect("get")
                .expect("entry visible");
            assert_eq!(stored.outcome, ImportOutcome::SiteBackfilled);
            assert_eq!(read_only.list(None, false).expect("list").len(), 1);
            assert_eq!(listing(dir.path()), before);
        }
        assert_eq!(listing(dir.path()), before);
    }

    #[test]
    fn pending_wal_disables_the_read_only_view() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("import-ledger.sqlite");
        ImportLedger::open(&path).expect("create");
        std::fs::write(wal_sidecar(&path), b"").expect("wal");

        let read_only = ImportLedger::open_read_only(&path).expect("open");
        assert!(read_only.list(None, false).expect("list").is_empty());
        assert_eq!(
            listing(dir.path()),
            vec![
                "import-ledger.sqlite".to_string(),
                "import-ledger.sqlite-wal".to_string()
            ]
        );
    }

    #[test]
    fn immutable_uri_escapes_query_characters() {
        assert_eq!(
            immutable_uri(Path::new("/lake/var/a?b#c%d.sqlite")),
            "file:/lake/var/a%3fb%23c%25d.sqlite?mode=ro&immutable=1"
        );
    }
}
