use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::app::error::{QuireError, Result};
use crate::browser::ChromeFetcher;
use crate::config::{Config, FetcherBackend};
use crate::fetcher::{HttpFetcher, PageFetcher};
use crate::lock::RunLock;
use crate::politeness::Scheduler;
use crate::registry::{Registry, Settings};
use crate::session::{Credentials, SessionManager};
use crate::sync::SyncEngine;

/// Where everything lives under the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub root: PathBuf,
    pub registry: PathBuf,
    pub metadata: PathBuf,
    pub sessions: PathBuf,
    pub archive: PathBuf,
}

impl DataPaths {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            registry: Registry::path_in(root),
            metadata: root.join("metadata"),
            sessions: root.join("sessions"),
            archive: root.join("archive"),
        }
    }
}

/// Per-invocation transport overrides from the command line.
#[derive(Debug, Clone, Default)]
pub struct FetcherOverrides {
    pub show_browser: bool,
    pub browser_profile: Option<PathBuf>,
}

impl FetcherOverrides {
    fn wants_browser(&self) -> bool {
        self.show_browser || self.browser_profile.is_some()
    }
}

pub struct AppContext {
    pub config: Config,
    pub paths: DataPaths,
}

impl AppContext {
    pub fn new(config: Config, data_dir: Option<PathBuf>) -> Result<Self> {
        let root = match data_dir {
            Some(dir) => dir,
            None => config
                .data_dir()
                .map_err(|e| QuireError::Config(e.to_string()))?,
        };
        std::fs::create_dir_all(&root)?;

        Ok(Self {
            paths: DataPaths::new(&root),
            config,
        })
    }

    pub fn registry(&self) -> Result<Registry> {
        Registry::load(&self.paths.registry)
    }

    pub fn lock(&self) -> Result<RunLock> {
        RunLock::acquire(&self.paths.root)
    }

    /// The configured transport, or the browser when the command line asks
    /// for a visible window or a profile.
    pub fn fetcher(&self, overrides: &FetcherOverrides) -> Result<Arc<dyn PageFetcher>> {
        if self.config.fetcher.backend == FetcherBackend::Browser || overrides.wants_browser() {
            let mut browser = self.config.browser.clone();
            if overrides.show_browser {
                browser = browser.visible();
            }
            if let Some(ref profile) = overrides.browser_profile {
                browser = browser.with_profile(profile.clone());
            }
            let scheduler = Scheduler::new(&self.config.politeness, Duration::ZERO);
            return Ok(Arc::new(ChromeFetcher::new(browser, scheduler)));
        }

        Ok(Arc::new(HttpFetcher::new(self.config.fetcher.timeout())?))
    }

    /// A session manager for maintenance commands; it never logs in.
    pub fn sessions(&self, fetcher: Arc<dyn PageFetcher>) -> SessionManager {
        let scheduler = Scheduler::new(&self.config.politeness, Duration::ZERO);
        SessionManager::new(fetcher, scheduler, self.paths.sessions.clone(), None)
    }

    pub fn engine(
        &self,
        fetcher: Arc<dyn PageFetcher>,
        settings: &Settings,
        credentials: Option<Credentials>,
    ) -> SyncEngine {
        SyncEngine::new(fetcher, &self.config, settings, &self.paths, credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_data_paths_layout() {
        let paths = DataPaths::new(Path::new("/data"));
        assert_eq!(paths.registry, PathBuf::from("/data/subscriptions.json"));
        assert_eq!(paths.metadata, PathBuf::from("/data/metadata"));
        assert_eq!(paths.sessions, PathBuf::from("/data/sessions"));
        assert_eq!(paths.archive, PathBuf::from("/data/archive"));
    }

    #[test]
    fn test_context_creates_data_dir() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("quire");
        let ctx = AppContext::new(Config::default(), Some(root.clone())).unwrap();
        assert!(root.is_dir());

        let registry = ctx.registry().unwrap();
        assert!(registry.list().is_empty());
        assert!(ctx.paths.registry.exists());
    }

    #[test]
    fn test_overrides_select_browser() {
        assert!(!FetcherOverrides::default().wants_browser());
        assert!(FetcherOverrides {
            show_browser: true,
            ..Default::default()
        }
        .wants_browser());
    }
}
