use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const TOKEN_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenIssuer {
    /// Produced by this tool logging in with the operator's credentials.
    Login,
    /// Handed over by the operator (imported cookie, existing browser profile).
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenPayload {
    Cookies { cookies: Vec<StoredCookie> },
    BrowserProfile { path: PathBuf },
}

/// Versioned, opaque-to-the-core session artifact.
///
/// `obtained_at` is informational only; expiry is detected from responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBlob {
    pub version: u32,
    pub issuer: TokenIssuer,
    pub payload: TokenPayload,
    pub obtained_at: DateTime<Utc>,
}

impl TokenBlob {
    pub fn cookies(issuer: TokenIssuer, cookies: Vec<StoredCookie>) -> Self {
        Self {
            version: TOKEN_FORMAT_VERSION,
            issuer,
            payload: TokenPayload::Cookies { cookies },
            obtained_at: Utc::now(),
        }
    }

    pub fn browser_profile(path: PathBuf) -> Self {
        Self {
            version: TOKEN_FORMAT_VERSION,
            issuer: TokenIssuer::External,
            payload: TokenPayload::BrowserProfile { path },
            obtained_at: Utc::now(),
        }
    }

    /// `Cookie` header value for HTTP transports; `None` for profile tokens.
    pub fn cookie_header(&self) -> Option<String> {
        match &self.payload {
            TokenPayload::Cookies { cookies } if !cookies.is_empty() => Some(
                cookies
                    .iter()
                    .map(|c| format!("{}={}", c.name, c.value))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub source_url: String,
    pub token: Option<TokenBlob>,
    pub state: SessionState,
}

impl Session {
    pub fn anonymous(source_url: &str) -> Self {
        Self {
            source_url: source_url.to_string(),
            token: None,
            state: SessionState::Unauthenticated,
        }
    }

    pub fn authenticated(source_url: &str, token: TokenBlob) -> Self {
        Self {
            source_url: source_url.to_string(),
            token: Some(token),
            state: SessionState::Authenticated,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated && self.token.is_some()
    }

    /// Token to attach to outgoing requests, only while authenticated.
    pub fn active_token(&self) -> Option<&TokenBlob> {
        if self.is_authenticated() {
            self.token.as_ref()
        } else {
            None
        }
    }
}
