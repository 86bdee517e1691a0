//! Parsing of archive listings into post records.

use chrono::{DateTime, Utc};
use feed_rs::parser;
use html_escape::decode_html_entities;
use serde::Deserialize;

use crate::app::{QuireError, Result};
use crate::domain::PostRecord;

/// One entry of the archive API response; unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct ArchivePost {
    slug: String,
    #[serde(default)]
    title: Option<String>,
    post_date: Option<DateTime<Utc>>,
    #[serde(default)]
    audience: Option<String>,
    #[serde(default)]
    canonical_url: Option<String>,
}

pub fn is_paid_audience(audience: Option<&str>) -> bool {
    matches!(audience, Some("only_paid") | Some("founding"))
}

/// Parse one page of `api/v1/archive`.
///
/// Returns the usable records and the raw entry count, which drives
/// pagination even when some entries are dropped.
pub fn parse_archive_page(source_url: &str, body: &str) -> Result<(Vec<PostRecord>, usize)> {
    let posts: Vec<ArchivePost> = serde_json::from_str(body)?;
    let raw_count = posts.len();

    let records = posts
        .into_iter()
        .filter_map(|post| {
            let Some(publish_date) = post.post_date else {
                tracing::debug!("Dropping undated listing entry {}", post.slug);
                return None;
            };
            let url = post
                .canonical_url
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| format!("{}/p/{}", source_url, post.slug));
            let post_id = PostRecord::id_from_url(&url).unwrap_or_else(|| format!("p/{}", post.slug));

            Some(PostRecord {
                post_id,
                source_url: source_url.to_string(),
                url,
                slug: post.slug,
                publish_date,
                is_premium: is_paid_audience(post.audience.as_deref()),
                title: post
                    .title
                    .map(|t| decode_html_entities(&t).to_string())
                    .unwrap_or_default(),
            })
        })
        .collect();

    Ok((records, raw_count))
}

/// Parse the publication's RSS/Atom feed.
///
/// Feeds do not say which posts are paid; records come back as free and the
/// post API settles it at fetch time.
pub fn parse_feed(source_url: &str, body: &[u8]) -> Result<Vec<PostRecord>> {
    let feed = parser::parse(body).map_err(|e| QuireError::Other(format!("feed: {}", e)))?;

    let records = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let url = entry.links.first().map(|l| l.href.clone())?;
            let post_id = PostRecord::id_from_url(&url)?;
            let publish_date = entry.published.or(entry.updated)?.with_timezone(&Utc);
            let slug = PostRecord::slug_from_id(&post_id).to_string();

            Some(PostRecord {
                post_id,
                source_url: source_url.to_string(),
                url,
                slug,
                publish_date,
                is_premium: false,
                title: entry
                    .title
                    .map(|t| decode_html_entities(&t.content).to_string())
                    .unwrap_or_default(),
            })
        })
        .collect();

    Ok(records)
}
