use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{DropError, DropResult};

#[derive(Debug, Clone, Deserialize)]
struct SiteRow {
    #[serde(alias = "token")]
    basename: String,
    #[serde(alias = "name")]
    id: String,
}

/// Operator-curated alias table: filename token -> canonical site id.
/// Several tokens may share one id (`Gatwick` and `London`).
#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
    entries: BTreeMap<String, String>,
}

impl SiteRegistry {
    /// A missing table is not an error: every lookup then reports
    /// `SiteNotFound` and callers decide what that means.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "site table missing, registry is empty");
            return Ok(Self::default());
        }

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_path(path)
            .with_context(|| format!("failed to open site table {}", path.display()))?;

        // A bad row costs that row only; `require_non_empty` decides whether
        // what is left is enough.
        let mut registry = Self::default();
        let mut rejected = 0usize;
        for (index, row) in reader.deserialize::<SiteRow>().enumerate() {
            match row {
                Ok(row) => registry.insert(row.basename, row.id),
                Err(err) => {
                    rejected += 1;
                    warn!(
                        path = %path.display(),
                        row = index + 1,
                        error = %err,
                        "skipping invalid site row"
                    );
                }
            }
        }

        info!(path = %path.display(), sites = registry.len(), rejected, "loaded site table");
        Ok(registry)
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut registry = Self::default();
        for (token, id) in pairs {
            registry.insert(token.into(), id.into());
        }
        registry
    }

    /// Last entry wins for a repeated token.
    pub fn insert(&mut self, token: String, id: String) {
        if token.is_empty() {
            return;
        }
        if let Some(previous) = self.entries.insert(token.clone(), id.clone()) {
            if previous != id {
                debug!(token = %token, previous = %previous, id = %id, "site token redefined");
            }
        }
    }

    pub fn resolve(&self, token: &str) -> DropResult<&str> {
        self.entries
            .get(token)
            .map(String::as_str)
            .ok_or_else(|| DropError::SiteNotFound(token.to_string()))
    }

    pub fn require_non_empty(&self, source: &Path) -> Result<()> {
        if self.entries.is_empty() {
            bail!("site registry {} is empty or missing", source.display());
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(token, id)| (token.as_str(), id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn load_reads_aliases_and_last_duplicate_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sites.csv");
        fs::write(
            &path,
            "basename,id\n# curated by ops\nBrussels,BRU\nGatwick,LON\nLondon,LON\nVienna2,VIE\nBrussels,BRX\n",
        )
        .expect("write site table");

        let registry = SiteRegistry::load(&path).expect("site table loads");
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.resolve("Brussels").expect("known"), "BRX");
        assert_eq!(registry.resolve("Gatwick").expect("known"), "LON");
        assert_eq!(registry.resolve("London").expect("known"), "LON");
        assert_eq!(registry.resolve("Vienna2").expect("known"), "VIE");
    }

    #[test]
    fn malformed_row_is_skipped_and_the_rest_still_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sites.csv");
        std::fs::write(
            &path,
            "basename,id\nBrussels,BRU\nLuxembourg,LUX,extra\nLondon,LON\n",
        )
        .expect("write");

        let registry = SiteRegistry::load(&path).expect("load");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.resolve("Brussels").expect("known"), "BRU");
        assert_eq!(registry.resolve("London").expect("known"), "LON");
        assert!(registry.resolve("Luxembourg").is_err());
        assert!(registry.require_non_empty(&path).is_ok());
    }

    #[test]
    fn table_of_only_bad_rows_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sites.csv");
        std::fs::write(&path, "basename,id\nLuxembourg,LUX,extra\n").expect("write");

        let registry = SiteRegistry::load(&path).expect("load");
        assert!(registry.is_empty());
        assert!(registry.require_non_empty(&path).is_err());
    }

    #[test]
    fn load_accepts_token_and_name_headers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sites.csv");
        fs::write(&path, "token, name\nBordeaux, 6\n").expect("write site table");

        let registry = SiteRegistry::load(&path).expect("site table loads");
        assert_eq!(registry.resolve("Bordeaux").expect("known"), "6");
    }

    #[test]
    fn missing_table_gives_empty_registry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.csv");

        let registry = SiteRegistry::load(&path).expect("missing table tolerated");
        assert!(registry.is_empty());
        assert!(matches!(
            registry.resolve("Brussels"),
            Err(DropError::SiteNotFound(token)) if token == "Brussels"
        ));
        assert!(registry.require_non_empty(&path).is_err());
    }

    #[test]
    fn resolve_is_case_sensitive_and_verbatim() {
        let registry = SiteRegistry::from_pairs([("Vienna", "10"), ("Vienna2", "10")]);
        assert_eq!(registry.resolve("Vienna2").expect("known"), "10");
        assert!(registry.resolve("vienna").is_err());
        assert!(registry.resolve("Vienna1").is_err());
        assert_eq!(registry.resolve("Vienna").ok(), registry.resolve("Vienna").ok());
    }
}
