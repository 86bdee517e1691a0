use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the headless Chrome backend
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrowserConfig {
    /// Whether to run the browser in headless mode (default: true)
    pub headless: bool,

    /// Existing, already logged-in profile to launch with
    pub profile_dir: Option<PathBuf>,

    /// Chrome/Chromium executable, when not discoverable on PATH
    pub chrome_path: Option<PathBuf>,

    /// Page load timeout in seconds (default: 30)
    pub timeout_secs: u64,

    /// Wait time after a login submit for the redirect in milliseconds (default: 3000)
    pub wait_after_login_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            profile_dir: None,
            chrome_path: None,
            timeout_secs: 30,
            wait_after_login_ms: 3000,
        }
    }
}

impl BrowserConfig {
    /// Get the page load timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get the post-login wait as a Duration
    pub fn wait_after_login(&self) -> Duration {
        Duration::from_millis(self.wait_after_login_ms)
    }

    /// Same settings with a visible window.
    pub fn visible(self) -> Self {
        Self {
            headless: false,
            ..self
        }
    }

    /// Same settings launching from `profile`.
    pub fn with_profile(self, profile: PathBuf) -> Self {
        Self {
            profile_dir: Some(profile),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = BrowserConfig::default();
        assert!(config.headless);
        assert!(config.profile_dir.is_none());
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.wait_after_login_ms, 3000);
    }

    #[test]
    fn test_timeout_duration() {
        let config = BrowserConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.wait_after_login(), Duration::from_millis(3000));
    }

    #[test]
    fn test_overrides() {
        let config = BrowserConfig::default()
            .visible()
            .with_profile(PathBuf::from("/tmp/profile"));
        assert!(!config.headless);
        assert_eq!(config.profile_dir, Some(PathBuf::from("/tmp/profile")));
    }
}
