//! Post API payload to markdown and HTML documents.

use chrono::{DateTime, Utc};
use comrak::{markdown_to_html, Options};
use html_escape::{decode_html_entities, encode_text};
use serde::Deserialize;

use crate::app::{QuireError, Result};
use crate::discovery::is_paid_audience;
use crate::domain::PostRecord;

/// Column width for the markdown body; wide enough that paragraphs never wrap.
const MARKDOWN_WIDTH: usize = 10_000;

/// Fields of `api/v1/posts/{slug}` that end up in the archive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostPayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub post_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub reaction_count: Option<u64>,
    #[serde(default)]
    pub audience: Option<String>,
}

impl PostPayload {
    pub fn parse(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// The post body, if the response carried one.
    pub fn body(&self) -> Option<&str> {
        self.body_html.as_deref().filter(|b| !b.trim().is_empty())
    }

    pub fn is_paid(&self) -> bool {
        is_paid_audience(self.audience.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPost {
    pub markdown: String,
    pub html: String,
}

pub fn html_to_markdown(html: &str) -> Result<String> {
    html2text::from_read(html.as_bytes(), MARKDOWN_WIDTH)
        .map_err(|e| QuireError::Other(format!("cannot convert post body: {}", e)))
}

/// Render a fetched post: markdown headed by title, subtitle, date and likes,
/// plus a standalone HTML page of the same markdown.
pub fn render(record: &PostRecord, payload: &PostPayload) -> Result<RenderedPost> {
    let body = payload
        .body()
        .ok_or_else(|| QuireError::ContentAccess(record.url.clone()))?;

    let title = display_title(record, payload);
    let date = payload.post_date.unwrap_or(record.publish_date);

    let mut markdown = format!("# {}\n\n", title.trim());
    if let Some(subtitle) = payload.subtitle.as_deref().filter(|s| !s.trim().is_empty()) {
        markdown.push_str(&format!("## {}\n\n", subtitle.trim()));
    }
    markdown.push_str(&format!("**{}**\n\n", date.format("%b %-d, %Y")));
    markdown.push_str(&format!(
        "**Likes:** {}\n\n",
        payload.reaction_count.unwrap_or(0)
    ));
    markdown.push_str(html_to_markdown(body)?.trim_end());
    markdown.push('\n');

    let html = html_page(&title, &markdown_html(&markdown));
    Ok(RenderedPost { markdown, html })
}

/// Title from the post API, falling back to the listing's.
pub fn display_title(record: &PostRecord, payload: &PostPayload) -> String {
    payload
        .title
        .as_deref()
        .map(|t| decode_html_entities(t).trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| record.title.clone())
}

fn markdown_html(markdown: &str) -> String {
    let mut options = Options::default();
    options.extension.table = true;
    options.extension.strikethrough = true;
    options.extension.footnotes = true;
    markdown_to_html(markdown, &options)
}

pub(crate) fn html_page(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{}</title>
<style>main {{ max-width: 42rem; margin: 2rem auto; font-family: Georgia, serif; line-height: 1.6; }}</style>
</head>
<body>
<main class="markdown-content">
{}</main>
</body>
</html>
"#,
        encode_text(title),
        content
    )
}
