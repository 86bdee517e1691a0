//! Configuration management for quire.
//!
//! Configuration is read from `~/.config/quire/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.
//! Every table rejects keys it does not know.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::browser::BrowserConfig;
use crate::retry::RetryPolicy;

/// Longest politeness delay accepted, in seconds.
pub const MAX_DELAY_SECS: f64 = 3600.0;

pub const DEFAULT_USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
];

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub paths: PathsConfig,
    pub fetcher: FetcherConfig,
    pub browser: BrowserConfig,
    pub politeness: PolitenessConfig,
    pub retry: RetryConfig,
    pub session: SessionConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Root for registry, metadata, sessions and archived documents.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetcherBackend {
    #[default]
    Http,
    Browser,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetcherConfig {
    pub backend: FetcherBackend,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            backend: FetcherBackend::Http,
            timeout_secs: 30,
        }
    }
}

impl FetcherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolitenessConfig {
    /// Lower bound of the random pause before each post request (default: 2.0)
    pub min_delay_secs: f64,
    /// Upper bound of the random pause before each post request (default: 5.0)
    pub max_delay_secs: f64,
    /// User agents rotated across requests
    pub user_agents: Vec<String>,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: 2.0,
            max_delay_secs: 5.0,
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl PolitenessConfig {
    /// No pauses at all; for tests and local mirrors.
    pub fn immediate() -> Self {
        Self {
            min_delay_secs: 0.0,
            max_delay_secs: 0.0,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts per request, first try included (default: 3)
    pub max_attempts: u32,
    /// Delay before the first retry, doubled on each further retry (default: 2000)
    pub base_delay_ms: u64,
    /// Random extra delay added to every backoff, upper bound (default: 1000)
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            jitter_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            jitter_range: Duration::from_millis(self.jitter_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Login attempts per source before giving up (default: 3)
    pub max_login_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_login_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Posts requested per archive page (default: 12)
    pub page_size: usize,
    /// First path segments that are never posts
    pub excluded_sections: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            page_size: 12,
            excluded_sections: vec!["about".into(), "archive".into(), "podcast".into()],
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// If the config file exists but is invalid, returns an error.
    /// Missing fields in the config file will use default values.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).map_err(|e| ConfigError::Io {
            path: config_path.clone(),
            source: e,
        })?;

        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: config_path.clone(),
                source,
            },
            ConfigError::Invalid { reason, .. } => ConfigError::Invalid {
                path: config_path.clone(),
                reason,
            },
            other => other,
        })
    }

    /// Parse and validate configuration text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            source: e,
        })?;
        config.validate().map_err(|reason| ConfigError::Invalid {
            path: PathBuf::new(),
            reason,
        })?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        let p = &self.politeness;
        if p.min_delay_secs < 0.0 || !p.min_delay_secs.is_finite() || !p.max_delay_secs.is_finite()
        {
            return Err("politeness delays must be finite and non-negative".into());
        }
        if p.max_delay_secs > MAX_DELAY_SECS {
            return Err(format!(
                "politeness.max_delay_secs ({}) exceeds the limit of {} seconds",
                p.max_delay_secs, MAX_DELAY_SECS
            ));
        }
        if p.min_delay_secs > p.max_delay_secs {
            return Err(format!(
                "politeness.min_delay_secs ({}) exceeds max_delay_secs ({})",
                p.min_delay_secs, p.max_delay_secs
            ));
        }
        if p.user_agents.is_empty() {
            return Err("politeness.user_agents must not be empty".into());
        }
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".into());
        }
        if self.session.max_login_attempts == 0 {
            return Err("session.max_login_attempts must be at least 1".into());
        }
        if self.discovery.page_size == 0 {
            return Err("discovery.page_size must be at least 1".into());
        }
        Ok(())
    }

    /// Get the default config file path: `~/.config/quire/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("quire").join("config.toml"))
    }

    /// Data directory: configured, or `<data_dir>/quire`.
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.paths.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|d| d.join("quire"))
                .ok_or(ConfigError::NoDataDir),
        }
    }

    /// Create a default config file with comments.
    fn create_default_config(path: &PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.clone(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.clone(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# quire configuration
#
# Subscriptions and the two run-wide settings (default_start_date,
# delay_between_subscriptions) live in subscriptions.json inside the data
# directory; edit them with `quire add/remove/toggle/set`.

[paths]
# Where the registry, metadata, sessions and archived posts are kept.
# Defaults to the platform data directory (e.g. ~/.local/share/quire).
# data_dir = "/home/me/newsletters"

[fetcher]
# "http" talks to the archive directly; "browser" drives headless Chrome.
backend = "http"

# Request timeout in seconds
timeout_secs = 30

[browser]
# Run browser in headless mode (no visible window)
headless = true

# Reuse an already logged-in browser profile instead of logging in
# profile_dir = "/home/me/.config/chromium"

# Chrome/Chromium executable, if not on PATH
# chrome_path = "/usr/bin/chromium"

[politeness]
# Random pause before every post request, in seconds
min_delay_secs = 2.0
max_delay_secs = 5.0

# One of these is picked at random for each request
user_agents = [
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
]

[retry]
# Total attempts per request for timeouts and 429/5xx responses
max_attempts = 3

# First backoff in milliseconds, doubled for each further retry
base_delay_ms = 2000

# Random extra backoff, up to this many milliseconds
jitter_ms = 1000

[session]
# Failed logins before a source is abandoned for this run.
# Keep this low: repeated failed logins can lock the account.
max_login_attempts = 3

[discovery]
# Posts per archive page
page_size = 12

# Path sections that are never posts
excluded_sections = ["about", "archive", "podcast"]
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Could not determine data directory")]
    NoDataDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid config file at {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}
