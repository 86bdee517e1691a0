use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::app::Result;
use crate::domain::{PostRecord, StoredDocument};
use crate::executor::catalog::{record_in_catalog, CatalogEntry};
use crate::executor::converter::{PostPayload, RenderedPost};
use crate::store::write_atomic;

/// Lays out archived documents as `<root>/<kind>/<source-key>/<slug>.<ext>`,
/// plus a catalog per source under `<root>/catalog/`.
#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    root: PathBuf,
    markdown_root: PathBuf,
    html_root: PathBuf,
}

impl ArchiveWriter {
    pub fn new(archive_dir: &Path) -> Self {
        Self {
            root: archive_dir.to_path_buf(),
            markdown_root: archive_dir.join("markdown"),
            html_root: archive_dir.join("html"),
        }
    }

    pub fn markdown_path(&self, source_key: &str, slug: &str) -> PathBuf {
        self.markdown_root
            .join(source_key)
            .join(format!("{}.md", file_stem(slug)))
    }

    pub fn html_path(&self, source_key: &str, slug: &str) -> PathBuf {
        self.html_root
            .join(source_key)
            .join(format!("{}.html", file_stem(slug)))
    }

    /// Write both documents; returns where they landed once both are durable.
    pub fn write(&self, source_key: &str, slug: &str, rendered: &RenderedPost) -> Result<StoredDocument> {
        let markdown_path = self.markdown_path(source_key, slug);
        let html_path = self.html_path(source_key, slug);

        write_atomic(&markdown_path, rendered.markdown.as_bytes())?;
        write_atomic(&html_path, rendered.html.as_bytes())?;

        Ok(StoredDocument {
            markdown_path,
            html_path,
            content_hash: content_hash(&rendered.markdown),
        })
    }

    /// List a written post in its source's catalog and index page.
    pub fn catalog(
        &self,
        source_key: &str,
        publication: &str,
        record: &PostRecord,
        payload: &PostPayload,
        document: &StoredDocument,
    ) -> Result<()> {
        let entry = CatalogEntry::new(&self.root, record, payload, document);
        record_in_catalog(&self.root, source_key, publication, entry)
    }
}

pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

fn file_stem(slug: &str) -> String {
    let stem: String = slug
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = stem.trim_start_matches('.');
    if stem.is_empty() {
        "untitled".to_string()
    } else {
        stem.to_string()
    }
}
