use serde::{Deserialize, Serialize};
use url::Url;

use crate::app::{QuireError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Subscription {
    pub source_url: String,
    pub display_name: String,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Subscription {
    pub fn new(url: &str, display_name: Option<&str>, is_premium: bool) -> Result<Self> {
        let source_url = normalize_source_url(url)?;
        let display_name = match display_name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => publication_name(&source_url),
        };

        Ok(Self {
            source_url,
            display_name,
            is_premium,
            is_enabled: true,
        })
    }

    /// File-system safe identifier for this source's stores and documents.
    pub fn key(&self) -> String {
        source_key(&self.source_url)
    }
}

/// Canonical form of a source URL: `scheme://host[:port][/path]`.
///
/// Missing schemes default to https; query, fragment and trailing slashes
/// are dropped so `https://Example.substack.com/` and `example.substack.com`
/// name the same source.
pub fn normalize_source_url(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(QuireError::Registry("empty source URL".into()));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let url = Url::parse(&with_scheme)?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(QuireError::Registry(format!(
            "unsupported URL scheme '{}' in {}",
            url.scheme(),
            input
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| QuireError::Registry(format!("URL has no host: {}", input)))?;

    let mut canonical = format!("{}://{}", url.scheme(), host.to_ascii_lowercase());
    if let Some(port) = url.port() {
        canonical.push_str(&format!(":{}", port));
    }

    let path = url.path().trim_end_matches('/');
    if !path.is_empty() {
        canonical.push_str(path);
    }

    Ok(canonical)
}

/// Short publication name: the first host label, skipping a leading `www`.
pub fn publication_name(source_url: &str) -> String {
    let host = Url::parse(source_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| source_url.to_string());

    let mut labels = host.split('.');
    match labels.next() {
        Some("www") => labels.next().unwrap_or("www").to_string(),
        Some(first) => first.to_string(),
        None => host,
    }
}

/// Derive a file-system safe key from a normalized source URL.
pub fn source_key(source_url: &str) -> String {
    let without_scheme = source_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(source_url);

    without_scheme
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
