pub mod http_fetcher;

use async_trait::async_trait;

use crate::app::{QuireError, Result};
use crate::domain::TokenBlob;
use crate::session::Credentials;

pub use http_fetcher::HttpFetcher;

pub const LOGIN_URL: &str = "https://substack.com/api/v1/login";

/// One outgoing page request.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    pub url: &'a str,
    pub user_agent: &'a str,
    pub token: Option<&'a TokenBlob>,
}

impl<'a> PageRequest<'a> {
    pub fn new(url: &'a str, user_agent: &'a str) -> Self {
        Self {
            url,
            user_agent,
            token: None,
        }
    }

    pub fn with_token(mut self, token: Option<&'a TokenBlob>) -> Self {
        self.token = token;
        self
    }
}

/// A fetched page, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub url: String,
    pub status: u16,
    pub body: String,
}

impl Document {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-success status into the matching error.
    ///
    /// 401/403 mean the session expired when a token was sent, and that the
    /// content is closed to anonymous readers when none was.
    pub fn check(self, sent_token: bool) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        match self.status {
            401 | 403 if sent_token => Err(QuireError::SessionExpired(self.url)),
            401 | 403 => Err(QuireError::ContentAccess(self.url)),
            status => Err(QuireError::Status {
                url: self.url,
                status,
            }),
        }
    }
}

/// Transport capability: plain HTTP or a driven browser.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Retrieve `request.url`, attaching the session token if present.
    ///
    /// Transport failures are errors; HTTP error statuses are returned in
    /// the document for the caller to classify.
    async fn navigate(&self, request: PageRequest<'_>) -> Result<Document>;

    /// Log in to `source_url` and return the resulting session token.
    ///
    /// A rejection of the credentials is [`QuireError::Authentication`];
    /// anything else is a transport problem that may be retried.
    async fn authenticate(
        &self,
        source_url: &str,
        credentials: &Credentials,
        user_agent: &str,
    ) -> Result<TokenBlob>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(status: u16) -> Document {
        Document {
            url: "https://a.example/api/v1/posts/x".into(),
            status,
            body: String::new(),
        }
    }

    #[test]
    fn test_check_success() {
        assert!(doc(200).check(false).is_ok());
        assert!(doc(204).check(true).is_ok());
    }

    #[test]
    fn test_check_auth_statuses() {
        assert!(matches!(doc(401).check(true), Err(QuireError::SessionExpired(_))));
        assert!(matches!(doc(403).check(true), Err(QuireError::SessionExpired(_))));
        assert!(matches!(doc(403).check(false), Err(QuireError::ContentAccess(_))));
    }

    #[test]
    fn test_check_other_statuses() {
        let err = doc(503).check(true).unwrap_err();
        assert!(err.is_transient());
        let err = doc(404).check(false).unwrap_err();
        assert!(!err.is_transient());
    }
}
