//! Authenticated sessions per source.
//!
//! Tokens are kept in memory for the run and on disk under `sessions/` so the
//! next run can reuse them. Expiry is never predicted: a token is used until a
//! response says it no longer works, then [`SessionManager::invalidate`] drops
//! it everywhere and the next [`SessionManager::get_session`] logs in again.

mod credentials;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::app::{QuireError, Result};
use crate::domain::{
    normalize_source_url, source_key, Session, SessionState, Subscription, TokenBlob,
    TOKEN_FORMAT_VERSION,
};
use crate::fetcher::PageFetcher;
use crate::politeness::{Scheduler, Scope};
use crate::retry::RetryPolicy;
use crate::store::write_json_atomic;

pub use credentials::{Credentials, EMAIL_VAR, PASSWORD_VAR};

pub struct SessionManager {
    fetcher: Arc<dyn PageFetcher>,
    scheduler: Scheduler,
    dir: PathBuf,
    credentials: Option<Credentials>,
    max_login_attempts: u32,
    retry: RetryPolicy,
    live: HashMap<String, Session>,
    /// Why the shared credentials were refused, once they have been.
    rejected: Option<String>,
}

impl SessionManager {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        scheduler: Scheduler,
        dir: PathBuf,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            fetcher,
            scheduler,
            dir,
            credentials,
            max_login_attempts: 3,
            retry: RetryPolicy::default(),
            live: HashMap::new(),
            rejected: None,
        }
    }

    pub fn with_max_login_attempts(mut self, attempts: u32) -> Self {
        self.max_login_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn token_path(dir: &Path, source_url: &str) -> PathBuf {
        dir.join(format!("{}.json", source_key(source_url)))
    }

    /// A usable session for `subscription`, logging in only when needed.
    ///
    /// Free subscriptions and premium ones without credentials get an
    /// unauthenticated session. Login failures end with
    /// [`QuireError::Authentication`] or [`QuireError::LockoutRisk`]. Once the
    /// credentials are refused, later sources fail without another attempt.
    pub async fn get_session(&mut self, subscription: &Subscription) -> Result<Session> {
        let source_url = subscription.source_url.as_str();

        if !subscription.is_premium {
            return Ok(Session::anonymous(source_url));
        }

        if let Some(session) = self.reusable(source_url) {
            return Ok(session);
        }

        let Some(credentials) = self.credentials.clone() else {
            warn!(
                "No credentials for premium source {} (set {} and {}); premium posts will be skipped",
                source_url, EMAIL_VAR, PASSWORD_VAR
            );
            return Ok(Session::anonymous(source_url));
        };

        if let Some(reason) = &self.rejected {
            return Err(QuireError::Authentication {
                source_url: source_url.to_string(),
                reason: format!("credentials already refused this run ({})", reason),
            });
        }

        let token = match self.login(source_url, &credentials).await {
            Ok(token) => token,
            Err(QuireError::Authentication { source_url, reason }) => {
                self.rejected = Some(reason.clone());
                return Err(QuireError::Authentication { source_url, reason });
            }
            Err(e) => return Err(e),
        };
        self.save_token(source_url, &token)?;

        let session = Session::authenticated(source_url, token);
        self.live.insert(source_url.to_string(), session.clone());
        info!("Logged in to {}", source_url);
        Ok(session)
    }

    /// A session that is already available, without ever logging in.
    pub fn peek(&mut self, subscription: &Subscription) -> Session {
        if !subscription.is_premium {
            return Session::anonymous(&subscription.source_url);
        }
        self.reusable(&subscription.source_url)
            .unwrap_or_else(|| Session::anonymous(&subscription.source_url))
    }

    fn reusable(&mut self, source_url: &str) -> Option<Session> {
        if let Some(session) = self.live.get(source_url) {
            if session.is_authenticated() {
                return Some(session.clone());
            }
        }

        let token = self.load_token(source_url)?;
        let session = Session::authenticated(source_url, token);
        self.live.insert(source_url.to_string(), session.clone());
        tracing::debug!("Reusing stored session for {}", source_url);
        Some(session)
    }

    async fn login(&self, source_url: &str, credentials: &Credentials) -> Result<TokenBlob> {
        let mut last_error = None;

        for attempt in 1..=self.max_login_attempts {
            if attempt == 1 {
                self.scheduler.throttle(Scope::Post).await;
            } else {
                self.scheduler.backoff(&self.retry, attempt - 1).await;
            }

            let user_agent = self.scheduler.user_agent().to_string();
            match self
                .fetcher
                .authenticate(source_url, credentials, &user_agent)
                .await
            {
                Ok(token) => return Ok(token),
                Err(e @ QuireError::Authentication { .. }) => return Err(e),
                Err(e) if e.is_transient() => {
                    warn!(
                        attempt,
                        max_attempts = self.max_login_attempts,
                        "Login to {} failed: {}",
                        source_url,
                        e
                    );
                    last_error = Some(e);
                }
                Err(e) => {
                    return Err(QuireError::Authentication {
                        source_url: source_url.to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }

        if let Some(e) = last_error {
            warn!("Giving up on {} after: {}", source_url, e);
        }
        Err(QuireError::LockoutRisk {
            source_url: source_url.to_string(),
            attempts: self.max_login_attempts,
        })
    }

    /// Mark `session` expired and forget its token in memory and on disk.
    pub fn invalidate(&mut self, session: &mut Session) -> Result<()> {
        session.state = SessionState::Expired;
        self.live.remove(&session.source_url);

        let path = Self::token_path(&self.dir, &session.source_url);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(QuireError::Persistence { path, source: e }),
        }

        info!("Session for {} expired", session.source_url);
        Ok(())
    }

    /// Install an externally obtained session.
    ///
    /// It wins over anything stored for the run; on disk it replaces the
    /// stored token unless that one is newer.
    pub fn supply(&mut self, session: Session) -> Result<()> {
        let Some(token) = session.token.clone() else {
            return Err(QuireError::Other(format!(
                "supplied session for {} carries no token",
                session.source_url
            )));
        };

        let source_url = normalize_source_url(&session.source_url)?;
        let stored_is_newer = self
            .load_token(&source_url)
            .is_some_and(|stored| stored.obtained_at > token.obtained_at);
        if !stored_is_newer {
            self.save_token(&source_url, &token)?;
        }

        self.live
            .insert(source_url.clone(), Session::authenticated(&source_url, token));
        Ok(())
    }

    fn load_token(&self, source_url: &str) -> Option<TokenBlob> {
        let path = Self::token_path(&self.dir, source_url);
        let content = fs::read_to_string(&path).ok()?;

        let value: serde_json::Value = match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(e) => {
                warn!("Ignoring unreadable session file {}: {}", path.display(), e);
                return None;
            }
        };

        let version = value.get("version").and_then(|v| v.as_u64());
        if version != Some(u64::from(TOKEN_FORMAT_VERSION)) {
            warn!(
                "Ignoring session file {} with unsupported format version {:?}",
                path.display(),
                version
            );
            return None;
        }

        match serde_json::from_value(value) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!("Ignoring malformed session file {}: {}", path.display(), e);
                None
            }
        }
    }

    fn save_token(&self, source_url: &str, token: &TokenBlob) -> Result<()> {
        write_json_atomic(&Self::token_path(&self.dir, source_url), token)
    }

    /// Stored tokens as `(source key, token)`, sorted by key.
    pub fn list(&self) -> Result<Vec<(String, TokenBlob)>> {
        list_tokens(&self.dir)
    }

    /// Forget the stored token for `url`; returns whether one existed.
    pub fn clear(&mut self, url: &str) -> Result<bool> {
        let source_url = normalize_source_url(url)?;
        self.live.remove(&source_url);
        clear_token(&self.dir, &source_url)
    }
}

pub fn list_tokens(dir: &Path) -> Result<Vec<(String, TokenBlob)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut tokens = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
            continue;
        };
        let content = fs::read_to_string(&path)?;
        match serde_json::from_str::<TokenBlob>(&content) {
            Ok(token) => tokens.push((key, token)),
            Err(e) => warn!("Ignoring unreadable session file {}: {}", path.display(), e),
        }
    }

    tokens.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(tokens)
}

pub fn clear_token(dir: &Path, source_url: &str) -> Result<bool> {
    let path = SessionManager::token_path(dir, source_url);
    match fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(QuireError::Persistence { path, source: e }),
    }
}
