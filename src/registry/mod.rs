//! Subscription registry: the durable list of sources and run settings.
//!
//! Stored as `subscriptions.json` in the data directory. Every mutation is
//! written through atomic replace before the in-memory copy changes, so a
//! failed write leaves both untouched.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::app::{QuireError, Result};
use crate::domain::{normalize_source_url, Subscription};
use crate::store::write_json_atomic;

pub const REGISTRY_FILE: &str = "subscriptions.json";

/// Recognized setting keys, for help output.
pub const SETTING_KEYS: [&str; 2] = ["default_start_date", "delay_between_subscriptions"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Lower bound for initial runs without an explicit start date.
    pub default_start_date: Option<NaiveDate>,
    /// Seconds to wait before moving to the next subscription.
    pub delay_between_subscriptions: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_start_date: None,
            delay_between_subscriptions: 10,
        }
    }
}

impl Settings {
    /// Configured start date, or twelve months before `today`.
    pub fn start_date(&self, today: NaiveDate) -> NaiveDate {
        self.default_start_date.unwrap_or_else(|| {
            today
                .checked_sub_months(Months::new(12))
                .unwrap_or(NaiveDate::MIN)
        })
    }

    pub fn subscription_delay(&self) -> Duration {
        Duration::from_secs(self.delay_between_subscriptions)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "default_start_date" => {
                self.default_start_date = match value {
                    "" | "unset" | "null" | "none" => None,
                    date => Some(parse_date(date).map_err(|_| {
                        QuireError::InvalidSetting(format!(
                            "default_start_date must be YYYY-MM-DD or 'unset', got '{}'",
                            date
                        ))
                    })?),
                };
            }
            "delay_between_subscriptions" => {
                self.delay_between_subscriptions = value.parse().map_err(|_| {
                    QuireError::InvalidSetting(format!(
                        "delay_between_subscriptions must be a non-negative number of seconds, got '{}'",
                        value
                    ))
                })?;
            }
            other => {
                return Err(QuireError::InvalidSetting(format!(
                    "unknown setting '{}' (known: {})",
                    other,
                    SETTING_KEYS.join(", ")
                )))
            }
        }
        Ok(())
    }
}

pub fn parse_date(value: &str) -> std::result::Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryFile {
    #[serde(default)]
    settings: Settings,
    #[serde(default)]
    subscriptions: Vec<Subscription>,
}

/// Immutable copy of the registry a run works from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub subscriptions: Vec<Subscription>,
    pub settings: Settings,
}

impl Snapshot {
    pub fn enabled(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.iter().filter(|s| s.is_enabled)
    }

    pub fn find(&self, source_url: &str) -> Option<&Subscription> {
        self.subscriptions
            .iter()
            .find(|s| s.source_url == source_url)
    }
}

#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    data: RegistryFile,
}

impl Registry {
    pub fn path_in(data_dir: &Path) -> PathBuf {
        data_dir.join(REGISTRY_FILE)
    }

    /// Load the registry, creating an empty one if the file is missing.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let registry = Self {
                path: path.to_path_buf(),
                data: RegistryFile::default(),
            };
            write_json_atomic(path, &registry.data)?;
            tracing::info!("Created empty registry at {}", path.display());
            return Ok(registry);
        }

        let content = fs::read_to_string(path).map_err(|e| {
            QuireError::Registry(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut data: RegistryFile = serde_json::from_str(&content).map_err(|e| {
            QuireError::Registry(format!("cannot parse {}: {}", path.display(), e))
        })?;

        // Hand edits may spell a source differently from what `add` stores.
        let mut rewritten = false;
        for sub in &mut data.subscriptions {
            let canonical = normalize_source_url(&sub.source_url).map_err(|e| {
                QuireError::Registry(format!("{} in {}", e, path.display()))
            })?;
            if canonical != sub.source_url {
                tracing::debug!("Normalized {} to {}", sub.source_url, canonical);
                sub.source_url = canonical;
                rewritten = true;
            }
        }

        let mut seen = std::collections::HashSet::new();
        for sub in &data.subscriptions {
            if !seen.insert(sub.source_url.as_str()) {
                return Err(QuireError::Registry(format!(
                    "{} lists {} more than once",
                    path.display(),
                    sub.source_url
                )));
            }
        }

        if rewritten {
            write_json_atomic(path, &data)?;
            tracing::info!("Rewrote {} with normalized source URLs", path.display());
        }

        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    pub fn list(&self) -> &[Subscription] {
        &self.data.subscriptions
    }

    pub fn settings(&self) -> &Settings {
        &self.data.settings
    }

    pub fn find(&self, url: &str) -> Option<&Subscription> {
        let source_url = normalize_source_url(url).ok()?;
        self.data
            .subscriptions
            .iter()
            .find(|s| s.source_url == source_url)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            subscriptions: self.data.subscriptions.clone(),
            settings: self.data.settings.clone(),
        }
    }

    pub fn add(&mut self, url: &str, name: Option<&str>, premium: bool) -> Result<Subscription> {
        let sub = Subscription::new(url, name, premium)?;
        if self.position(&sub.source_url).is_some() {
            return Err(QuireError::DuplicateSubscription(sub.source_url));
        }

        let mut next = self.data.clone();
        next.subscriptions.push(sub.clone());
        self.commit(next)?;
        Ok(sub)
    }

    pub fn remove(&mut self, url: &str) -> Result<Subscription> {
        let source_url = normalize_source_url(url)?;
        let index = self
            .position(&source_url)
            .ok_or(QuireError::NotFound(source_url))?;

        let mut next = self.data.clone();
        let removed = next.subscriptions.remove(index);
        self.commit(next)?;
        Ok(removed)
    }

    /// Flip `is_enabled`; returns the new value.
    pub fn toggle(&mut self, url: &str) -> Result<bool> {
        let source_url = normalize_source_url(url)?;
        let index = self
            .position(&source_url)
            .ok_or(QuireError::NotFound(source_url))?;

        let mut next = self.data.clone();
        let sub = &mut next.subscriptions[index];
        sub.is_enabled = !sub.is_enabled;
        let enabled = sub.is_enabled;
        self.commit(next)?;
        Ok(enabled)
    }

    pub fn update_setting(&mut self, key: &str, value: &str) -> Result<()> {
        let mut next = self.data.clone();
        next.settings.apply(key, value)?;
        self.commit(next)
    }

    fn position(&self, source_url: &str) -> Option<usize> {
        self.data
            .subscriptions
            .iter()
            .position(|s| s.source_url == source_url)
    }

    fn commit(&mut self, next: RegistryFile) -> Result<()> {
        write_json_atomic(&self.path, &next)?;
        self.data = next;
        Ok(())
    }
}
