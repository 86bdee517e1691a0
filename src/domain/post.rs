use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// A post as seen in a listing, before any content is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRecord {
    /// Stable identifier: the canonical URL path, e.g. `p/some-post`.
    pub post_id: String,
    pub source_url: String,
    pub url: String,
    pub slug: String,
    pub publish_date: DateTime<Utc>,
    pub is_premium: bool,
    pub title: String,
}

impl PostRecord {
    /// Derive a post id from the post's permanent address.
    ///
    /// Returns `None` for URLs without a path (the publication's front page).
    pub fn id_from_url(url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let path = parsed.path().trim_matches('/');
        if path.is_empty() {
            None
        } else {
            Some(path.to_string())
        }
    }

    /// Last path segment of the post id.
    pub fn slug_from_id(post_id: &str) -> &str {
        post_id.rsplit('/').next().unwrap_or(post_id)
    }

    /// First path segment, used to drop non-post sections like `about`.
    pub fn section(&self) -> &str {
        self.post_id.split('/').next().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Premium content and no authenticated session able to read it.
    NoAccess,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoAccess => write!(f, "no_access"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    Complete,
    Skipped(SkipReason),
    Failed(String),
}

impl EntryStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, EntryStatus::Complete)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryStatus::Complete => write!(f, "complete"),
            EntryStatus::Skipped(reason) => write!(f, "skipped ({})", reason),
            EntryStatus::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// Where a completed post's document landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub markdown_path: PathBuf,
    pub html_path: PathBuf,
    pub content_hash: String,
}

/// Outcome of one fetch attempt, as kept in the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "EntryRecord", try_from = "EntryRecord")]
pub struct ArchiveEntry {
    pub post_id: String,
    pub fetched_at: DateTime<Utc>,
    pub status: EntryStatus,
    pub document: Option<StoredDocument>,
}

impl ArchiveEntry {
    pub fn complete(post_id: &str, document: StoredDocument) -> Self {
        Self {
            post_id: post_id.to_string(),
            fetched_at: Utc::now(),
            status: EntryStatus::Complete,
            document: Some(document),
        }
    }

    pub fn skipped(post_id: &str, reason: SkipReason) -> Self {
        Self {
            post_id: post_id.to_string(),
            fetched_at: Utc::now(),
            status: EntryStatus::Skipped(reason),
            document: None,
        }
    }

    pub fn failed(post_id: &str, reason: impl Into<String>) -> Self {
        Self {
            post_id: post_id.to_string(),
            fetched_at: Utc::now(),
            status: EntryStatus::Failed(reason.into()),
            document: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum StatusKind {
    Complete,
    Skipped,
    Failed,
}

/// Flat on-disk shape: `{post_id, fetched_at, status, detail, document?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryRecord {
    post_id: String,
    fetched_at: DateTime<Utc>,
    status: StatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    document: Option<StoredDocument>,
}

impl From<ArchiveEntry> for EntryRecord {
    fn from(entry: ArchiveEntry) -> Self {
        let (status, detail) = match entry.status {
            EntryStatus::Complete => (StatusKind::Complete, None),
            EntryStatus::Skipped(reason) => (StatusKind::Skipped, Some(reason.to_string())),
            EntryStatus::Failed(reason) => (StatusKind::Failed, Some(reason)),
        };
        Self {
            post_id: entry.post_id,
            fetched_at: entry.fetched_at,
            status,
            detail,
            document: entry.document,
        }
    }
}

impl TryFrom<EntryRecord> for ArchiveEntry {
    type Error = String;

    fn try_from(record: EntryRecord) -> std::result::Result<Self, Self::Error> {
        let status = match record.status {
            StatusKind::Complete => {
                if record.document.is_none() {
                    return Err(format!(
                        "entry {} is complete but names no document",
                        record.post_id
                    ));
                }
                EntryStatus::Complete
            }
            StatusKind::Skipped => match record.detail.as_deref() {
                Some("no_access") | None => EntryStatus::Skipped(SkipReason::NoAccess),
                Some(other) => return Err(format!("unknown skip reason '{}'", other)),
            },
            StatusKind::Failed => EntryStatus::Failed(record.detail.unwrap_or_default()),
        };

        Ok(Self {
            post_id: record.post_id,
            fetched_at: record.fetched_at,
            status,
            document: record.document,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_from_url_uses_path() {
        assert_eq!(
            PostRecord::id_from_url("https://example.substack.com/p/hello-world/"),
            Some("p/hello-world".to_string())
        );
        assert_eq!(
            PostRecord::id_from_url("https://example.substack.com/p/hello-world?s=r"),
            Some("p/hello-world".to_string())
        );
        assert_eq!(PostRecord::id_from_url("https://example.substack.com/"), None);
    }

    #[test]
    fn test_slug_from_id() {
        assert_eq!(PostRecord::slug_from_id("p/hello-world"), "hello-world");
        assert_eq!(PostRecord::slug_from_id("standalone"), "standalone");
    }

    #[test]
    fn test_entry_serializes_flat() {
        let entry = ArchiveEntry::skipped("p/a", SkipReason::NoAccess);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["status"], "skipped");
        assert_eq!(value["detail"], "no_access");
        assert!(value.get("document").is_none());

        let back: ArchiveEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_complete_without_document_is_rejected() {
        let json = r#"{"post_id":"p/a","fetched_at":"2024-01-01T00:00:00Z","status":"complete"}"#;
        assert!(serde_json::from_str::<ArchiveEntry>(json).is_err());
    }

    #[test]
    fn test_failed_keeps_reason() {
        let json = r#"{"post_id":"p/a","fetched_at":"2024-01-01T00:00:00Z","status":"failed","detail":"timeout"}"#;
        let entry: ArchiveEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.status, EntryStatus::Failed("timeout".into()));
    }
}
