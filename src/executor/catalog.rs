//! Per-source catalog of archived posts and the index page rendered from it.
//!
//! The catalog lives next to the documents as `catalog/<source-key>.json`;
//! the index page `catalog/<source-key>.html` links to every archived post.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use html_escape::{encode_double_quoted_attribute, encode_text};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::app::Result;
use crate::domain::{PostRecord, StoredDocument};
use crate::executor::converter::{display_title, html_page, PostPayload};
use crate::store::{write_atomic, write_json_atomic};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub post_id: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub like_count: u64,
    pub date: DateTime<Utc>,
    /// Document paths relative to the archive root.
    pub markdown: PathBuf,
    pub html: PathBuf,
}

impl CatalogEntry {
    pub fn new(
        archive_root: &Path,
        record: &PostRecord,
        payload: &PostPayload,
        document: &StoredDocument,
    ) -> Self {
        let relative = |path: &Path| {
            path.strip_prefix(archive_root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| path.to_path_buf())
        };

        Self {
            post_id: record.post_id.clone(),
            title: display_title(record, payload),
            subtitle: payload
                .subtitle
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
            like_count: payload.reaction_count.unwrap_or(0),
            date: payload.post_date.unwrap_or(record.publish_date),
            markdown: relative(&document.markdown_path),
            html: relative(&document.html_path),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn json_path(archive_root: &Path, source_key: &str) -> PathBuf {
        archive_root.join("catalog").join(format!("{}.json", source_key))
    }

    pub fn index_path(archive_root: &Path, source_key: &str) -> PathBuf {
        archive_root.join("catalog").join(format!("{}.html", source_key))
    }

    /// Read a catalog; a missing file is an empty catalog, an unreadable one
    /// is rebuilt from the posts archived from now on.
    pub fn load(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!("Ignoring unreadable catalog {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Insert or replace by post id, keeping newest first.
    pub fn upsert(&mut self, entry: CatalogEntry) {
        self.entries.retain(|e| e.post_id != entry.post_id);
        self.entries.push(entry);
        self.entries.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then_with(|| a.post_id.cmp(&b.post_id))
        });
    }

    pub fn render_index(&self, publication: &str) -> String {
        let mut rows = String::new();
        for entry in &self.entries {
            let href = Path::new("..").join(&entry.html);
            rows.push_str(&format!(
                "<tr><td>{}</td><td><a href=\"{}\">{}</a>{}</td><td>{}</td><td><a href=\"{}\">md</a></td></tr>\n",
                entry.date.format("%Y-%m-%d"),
                encode_double_quoted_attribute(&href.to_string_lossy()),
                encode_text(&entry.title),
                entry
                    .subtitle
                    .as_deref()
                    .map(|s| format!("<br><small>{}</small>", encode_text(s)))
                    .unwrap_or_default(),
                entry.like_count,
                encode_double_quoted_attribute(
                    &Path::new("..").join(&entry.markdown).to_string_lossy()
                ),
            ));
        }

        let content = format!(
            "<h1>{}</h1>\n<p>{} archived posts</p>\n<table>\n<thead><tr><th>Date</th><th>Title</th><th>Likes</th><th></th></tr></thead>\n<tbody>\n{}</tbody>\n</table>\n",
            encode_text(publication),
            self.entries.len(),
            rows
        );
        html_page(publication, &content)
    }
}

/// Add `entry` to the source's catalog and re-render its index page.
pub fn record_in_catalog(
    archive_root: &Path,
    source_key: &str,
    publication: &str,
    entry: CatalogEntry,
) -> Result<()> {
    let json_path = Catalog::json_path(archive_root, source_key);
    let mut catalog = Catalog::load(&json_path);
    catalog.upsert(entry);

    write_json_atomic(&json_path, &catalog)?;
    write_atomic(
        &Catalog::index_path(archive_root, source_key),
        catalog.render_index(publication).as_bytes(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn entry(id: &str, day: u32, title: &str) -> CatalogEntry {
        CatalogEntry {
            post_id: format!("p/{}", id),
            title: title.into(),
            subtitle: None,
            like_count: 3,
            date: Utc.with_ymd_and_hms(2024, 1, day, 9, 0, 0).unwrap(),
            markdown: PathBuf::from(format!("markdown/k/{}.md", id)),
            html: PathBuf::from(format!("html/k/{}.html", id)),
        }
    }

    #[test]
    fn test_upsert_replaces_and_orders_newest_first() {
        let mut catalog = Catalog::default();
        catalog.upsert(entry("old", 1, "Old"));
        catalog.upsert(entry("new", 5, "New"));
        catalog.upsert(entry("old", 1, "Old, revised"));

        let ids: Vec<&str> = catalog.entries.iter().map(|e| e.post_id.as_str()).collect();
        assert_eq!(ids, vec!["p/new", "p/old"]);
        assert_eq!(catalog.entries[1].title, "Old, revised");
    }

    #[test]
    fn test_index_escapes_and_links_relative() {
        let mut catalog = Catalog::default();
        catalog.upsert(entry("tags", 2, "<b>Tags</b> & more"));

        let page = catalog.render_index("Example");
        assert!(page.contains("<title>Example</title>"));
        assert!(page.contains("&lt;b&gt;Tags&lt;/b&gt; &amp; more"));
        assert!(page.contains(r#"href="../html/k/tags.html""#));
        assert!(page.contains("1 archived posts"));
    }

    #[test]
    fn test_record_writes_catalog_and_index() {
        let dir = TempDir::new().unwrap();
        record_in_catalog(dir.path(), "k", "Example", entry("a", 1, "A")).unwrap();
        record_in_catalog(dir.path(), "k", "Example", entry("b", 2, "B")).unwrap();

        let catalog = Catalog::load(&Catalog::json_path(dir.path(), "k"));
        assert_eq!(catalog.entries.len(), 2);
        assert_eq!(catalog.entries[0].post_id, "p/b");

        let index = fs::read_to_string(Catalog::index_path(dir.path(), "k")).unwrap();
        assert!(index.contains("2 archived posts"));
    }

    #[test]
    fn test_unreadable_catalog_starts_over() {
        let dir = TempDir::new().unwrap();
        let path = Catalog::json_path(dir.path(), "k");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();
        assert!(Catalog::load(&path).entries.is_empty());
    }
}
