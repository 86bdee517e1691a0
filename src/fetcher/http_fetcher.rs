use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE, COOKIE, SET_COOKIE, USER_AGENT};
use reqwest::Client;
use secrecy::ExposeSecret;

use crate::app::{QuireError, Result};
use crate::domain::{publication_name, StoredCookie, TokenBlob, TokenIssuer, TokenPayload};
use crate::fetcher::{Document, PageFetcher, PageRequest, LOGIN_URL};
use crate::session::Credentials;

pub struct HttpFetcher {
    client: Client,
    login_url: String,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            login_url: LOGIN_URL.to_string(),
        })
    }

    /// Point logins at a different endpoint (self-hosted mirrors, tests).
    pub fn with_login_url(mut self, url: impl Into<String>) -> Self {
        self.login_url = url.into();
        self
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn navigate(&self, request: PageRequest<'_>) -> Result<Document> {
        let mut builder = self
            .client
            .get(request.url)
            .header(USER_AGENT, request.user_agent)
            .header(ACCEPT, "application/json, text/html;q=0.9, */*;q=0.8");

        if let Some(token) = request.token {
            match token.cookie_header() {
                Some(cookies) => {
                    if let Ok(value) = HeaderValue::from_str(&cookies) {
                        builder = builder.header(COOKIE, value);
                    }
                }
                None => {
                    if let TokenPayload::BrowserProfile { path } = &token.payload {
                        tracing::debug!(
                            "Browser profile {} has no effect on the http backend",
                            path.display()
                        );
                    }
                }
            }
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let body = response.text().await?;

        tracing::debug!(status, url = %url, "Fetched");
        Ok(Document { url, status, body })
    }

    async fn authenticate(
        &self,
        source_url: &str,
        credentials: &Credentials,
        user_agent: &str,
    ) -> Result<TokenBlob> {
        let payload = serde_json::json!({
            "email": credentials.email,
            "password": credentials.password.expose_secret(),
            "captcha_response": null,
            "for_pub": publication_name(source_url),
            "redirect": "/",
        });

        let response = self
            .client
            .post(&self.login_url)
            .header(USER_AGENT, user_agent)
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&payload)?)
            .send()
            .await?;

        let status = response.status().as_u16();
        let cookies: Vec<StoredCookie> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(parse_set_cookie)
            .collect();
        let body = response.text().await.unwrap_or_default();

        match status {
            200..=299 if !cookies.is_empty() => Ok(TokenBlob::cookies(TokenIssuer::Login, cookies)),
            200..=299 => Err(QuireError::Authentication {
                source_url: source_url.to_string(),
                reason: "login succeeded but no session cookie was issued".into(),
            }),
            400 | 401 | 403 => Err(QuireError::Authentication {
                source_url: source_url.to_string(),
                reason: login_error_message(&body).unwrap_or_else(|| format!("HTTP {}", status)),
            }),
            _ => Err(QuireError::Status {
                url: self.login_url.clone(),
                status,
            }),
        }
    }
}

/// Parse one `Set-Cookie` header into name, value and domain.
fn parse_set_cookie(header: &str) -> Option<StoredCookie> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.trim().split_once('=')?;
    if name.is_empty() {
        return None;
    }

    let domain = parts.find_map(|attr| {
        let (key, val) = attr.trim().split_once('=')?;
        key.eq_ignore_ascii_case("domain")
            .then(|| val.trim().trim_start_matches('.').to_string())
    });

    Some(StoredCookie {
        name: name.trim().to_string(),
        value: value.trim().to_string(),
        domain,
    })
}

fn login_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .or_else(|| value.get("errors").and_then(|e| e.get(0)).and_then(|e| e.get("msg")))
        .and_then(|e| e.as_str())
        .map(String::from)
}
