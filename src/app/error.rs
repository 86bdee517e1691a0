use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuireError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Subscription already exists: {0}")]
    DuplicateSubscription(String),

    #[error("Subscription not found: {0}")]
    NotFound(String),

    #[error("Authentication failed for {source_url}: {reason}")]
    Authentication { source_url: String, reason: String },

    #[error(
        "Gave up logging in to {source_url} after {attempts} attempts to avoid locking the account"
    )]
    LockoutRisk { source_url: String, attempts: u32 },

    #[error("Session expired for {0}")]
    SessionExpired(String),

    #[error("Access denied: {0}")]
    ContentAccess(String),

    #[error("Failed to read listing page {page} of {source_url}: {reason}")]
    Discovery {
        source_url: String,
        page: usize,
        reason: String,
    },

    #[error("Failed to persist {path}: {source}")]
    Persistence {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Another run is already in progress (PID {0})")]
    AlreadyRunning(u32),

    #[error("{0}")]
    Other(String),
}

impl QuireError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            QuireError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            QuireError::Status { status, .. } => *status == 429 || (500..=599).contains(status),
            QuireError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            QuireError::Browser(_) => true,
            _ => false,
        }
    }

    /// Errors that end the current source's run but let the batch continue.
    pub fn is_source_fatal(&self) -> bool {
        matches!(
            self,
            QuireError::Authentication { .. } | QuireError::LockoutRisk { .. }
        )
    }

    /// Errors that end the whole run.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, QuireError::Persistence { .. })
    }
}

pub type Result<T> = std::result::Result<T, QuireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let busy = QuireError::Status {
            url: "https://a.example".into(),
            status: 503,
        };
        let limited = QuireError::Status {
            url: "https://a.example".into(),
            status: 429,
        };
        let missing = QuireError::Status {
            url: "https://a.example".into(),
            status: 404,
        };
        assert!(busy.is_transient());
        assert!(limited.is_transient());
        assert!(!missing.is_transient());
    }

    #[test]
    fn test_auth_errors_are_source_fatal_not_transient() {
        let err = QuireError::LockoutRisk {
            source_url: "https://a.example".into(),
            attempts: 3,
        };
        assert!(err.is_source_fatal());
        assert!(!err.is_transient());
        assert!(!err.is_run_fatal());
    }

    #[test]
    fn test_persistence_is_run_fatal() {
        let err = QuireError::Persistence {
            path: PathBuf::from("/tmp/x.json"),
            source: std::io::Error::other("disk full"),
        };
        assert!(err.is_run_fatal());
        assert!(!err.is_source_fatal());
    }
}
