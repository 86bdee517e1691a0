//! Per-source metadata store: the record of what has been archived.
//!
//! One JSON file per source under `metadata/`. Every `record` rewrites the
//! whole file through [`atomic::write_atomic`], so the file on disk is always
//! a complete, valid store.

pub mod atomic;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::{QuireError, Result};
use crate::domain::{source_key, ArchiveEntry, EntryStatus};

pub use atomic::{write_atomic, write_json_atomic};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoreFile {
    source_url: String,
    last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    entries: BTreeMap<String, ArchiveEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub complete: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    data: StoreFile,
}

impl MetadataStore {
    pub fn path_for(dir: &Path, source_url: &str) -> PathBuf {
        dir.join(format!("{}.json", source_key(source_url)))
    }

    /// Load the store for `source_url`, or start an empty one.
    ///
    /// Nothing is written until the first `record`.
    pub fn load(dir: &Path, source_url: &str) -> Result<Self> {
        let path = Self::path_for(dir, source_url);

        if !path.exists() {
            return Ok(Self {
                path,
                data: StoreFile {
                    source_url: source_url.to_string(),
                    last_run_at: None,
                    entries: BTreeMap::new(),
                },
            });
        }

        let content = fs::read_to_string(&path)?;
        let data: StoreFile = serde_json::from_str(&content).map_err(|e| {
            QuireError::Other(format!(
                "Metadata store {} is unreadable: {}",
                path.display(),
                e
            ))
        })?;

        if data.source_url != source_url {
            return Err(QuireError::Other(format!(
                "Metadata store {} belongs to {}, not {}",
                path.display(),
                data.source_url,
                source_url
            )));
        }

        Ok(Self { path, data })
    }

    /// Record one resolved fetch attempt and persist the whole store.
    pub fn record(&mut self, entry: ArchiveEntry) -> Result<()> {
        let mut next = self.data.clone();
        next.last_run_at = Some(entry.fetched_at);
        next.entries.insert(entry.post_id.clone(), entry);

        write_json_atomic(&self.path, &next).map_err(|e| match e {
            QuireError::Persistence { .. } => e,
            other => QuireError::Persistence {
                path: self.path.clone(),
                source: std::io::Error::other(other.to_string()),
            },
        })?;

        self.data = next;
        Ok(())
    }

    pub fn contains(&self, post_id: &str) -> bool {
        self.data.entries.contains_key(post_id)
    }

    pub fn get(&self, post_id: &str) -> Option<&ArchiveEntry> {
        self.data.entries.get(post_id)
    }

    pub fn status(&self, post_id: &str) -> Option<&EntryStatus> {
        self.get(post_id).map(|e| &e.status)
    }

    pub fn is_complete(&self, post_id: &str) -> bool {
        self.status(post_id).is_some_and(EntryStatus::is_complete)
    }

    pub fn source_url(&self) -> &str {
        &self.data.source_url
    }

    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        self.data.last_run_at
    }

    pub fn len(&self) -> usize {
        self.data.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn summary(&self) -> StoreSummary {
        let mut summary = StoreSummary::default();
        for entry in self.data.entries.values() {
            match entry.status {
                EntryStatus::Complete => summary.complete += 1,
                EntryStatus::Skipped(_) => summary.skipped += 1,
                EntryStatus::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }
}

/// Load every store in `dir`, for status reporting.
pub fn load_all(dir: &Path) -> Result<Vec<MetadataStore>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut stores = Vec::new();
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    for path in paths {
        let content = fs::read_to_string(&path)?;
        match serde_json::from_str::<StoreFile>(&content) {
            Ok(data) => stores.push(MetadataStore { path, data }),
            Err(e) => tracing::warn!("Ignoring unreadable store {}: {}", path.display(), e),
        }
    }

    Ok(stores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SkipReason, StoredDocument};
    use tempfile::TempDir;

    const SOURCE: &str = "https://example.substack.com";

    fn document(slug: &str) -> StoredDocument {
        StoredDocument {
            markdown_path: PathBuf::from(format!("/archive/{}.md", slug)),
            html_path: PathBuf::from(format!("/archive/{}.html", slug)),
            content_hash: "00".repeat(32),
        }
    }

    #[test]
    fn test_load_missing_is_empty_and_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::load(dir.path(), SOURCE).unwrap();
        assert!(store.is_empty());
        assert!(store.last_run_at().is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_record_persists_immediately() {
        let dir = TempDir::new().unwrap();
        let mut store = MetadataStore::load(dir.path(), SOURCE).unwrap();

        store
            .record(ArchiveEntry::complete("p/a", document("a")))
            .unwrap();
        store
            .record(ArchiveEntry::skipped("p/b", SkipReason::NoAccess))
            .unwrap();

        let reloaded = MetadataStore::load(dir.path(), SOURCE).unwrap();
        assert!(reloaded.contains("p/a"));
        assert!(reloaded.is_complete("p/a"));
        assert_eq!(
            reloaded.status("p/b"),
            Some(&EntryStatus::Skipped(SkipReason::NoAccess))
        );
        assert!(!reloaded.contains("p/c"));
        assert!(reloaded.last_run_at().is_some());
    }

    #[test]
    fn test_record_overwrites_previous_attempt() {
        let dir = TempDir::new().unwrap();
        let mut store = MetadataStore::load(dir.path(), SOURCE).unwrap();

        store.record(ArchiveEntry::failed("p/a", "timeout")).unwrap();
        assert!(!store.is_complete("p/a"));

        store
            .record(ArchiveEntry::complete("p/a", document("a")))
            .unwrap();
        assert!(store.is_complete("p/a"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_summary_counts() {
        let dir = TempDir::new().unwrap();
        let mut store = MetadataStore::load(dir.path(), SOURCE).unwrap();
        store
            .record(ArchiveEntry::complete("p/a", document("a")))
            .unwrap();
        store
            .record(ArchiveEntry::skipped("p/b", SkipReason::NoAccess))
            .unwrap();
        store.record(ArchiveEntry::failed("p/c", "404")).unwrap();

        assert_eq!(
            store.summary(),
            StoreSummary {
                complete: 1,
                skipped: 1,
                failed: 1
            }
        );
    }

    #[test]
    fn test_corrupt_store_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = MetadataStore::path_for(dir.path(), SOURCE);
        fs::write(&path, "{ not json").unwrap();

        assert!(MetadataStore::load(dir.path(), SOURCE).is_err());
    }

    #[test]
    fn test_unwritable_store_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file, not a directory").unwrap();

        let mut store = MetadataStore::load(&blocker, SOURCE).unwrap();
        let err = store
            .record(ArchiveEntry::failed("p/a", "timeout"))
            .unwrap_err();
        assert!(err.is_run_fatal());
        assert!(!store.contains("p/a"));
    }

    #[test]
    fn test_load_all_sorted() {
        let dir = TempDir::new().unwrap();
        for source in ["https://b.substack.com", "https://a.substack.com"] {
            let mut store = MetadataStore::load(dir.path(), source).unwrap();
            store.record(ArchiveEntry::failed("p/x", "404")).unwrap();
        }

        let stores = load_all(dir.path()).unwrap();
        let urls: Vec<_> = stores.iter().map(|s| s.source_url()).collect();
        assert_eq!(urls, vec!["https://a.substack.com", "https://b.substack.com"]);
    }
}
