//! Run orchestration: sessions, discovery, diff and fetch for each source.
//!
//! Sources are handled one after another in registry order, posts one after
//! another in discovery order. Each fetch attempt is recorded before the next
//! one starts, so an interrupted run loses at most the post in flight.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tracing::{error, info, warn};

use crate::app::{DataPaths, QuireError, Result};
use crate::config::Config;
use crate::discovery::Discovery;
use crate::domain::{EntryStatus, PostRecord, Subscription};
use crate::executor::{ArchiveWriter, FetchExecutor};
use crate::fetcher::PageFetcher;
use crate::planner::{plan, Mode};
use crate::politeness::{Scheduler, Scope};
use crate::registry::Settings;
use crate::session::{Credentials, SessionManager};
use crate::store::MetadataStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Initial,
    Update,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Lower bound for initial runs; falls back to the registry setting.
    pub start_date: Option<NaiveDate>,
    pub dry_run: bool,
    pub limit: Option<usize>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::Update,
            start_date: None,
            dry_run: false,
            limit: None,
        }
    }
}

/// Outcome for one source.
#[derive(Debug, Clone, Default)]
pub struct SourceReport {
    pub source_url: String,
    pub display_name: String,
    pub discovered: usize,
    pub failed_pages: usize,
    /// The fetch plan; only kept for dry runs.
    pub planned: Vec<PostRecord>,
    pub planned_count: usize,
    pub complete: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Why the source was abandoned, if it was.
    pub aborted: Option<String>,
    pub lockout: bool,
}

impl SourceReport {
    fn new(subscription: &Subscription) -> Self {
        Self {
            source_url: subscription.source_url.clone(),
            display_name: subscription.display_name.clone(),
            ..Default::default()
        }
    }

    fn tally(&mut self, status: &EntryStatus) {
        match status {
            EntryStatus::Complete => self.complete += 1,
            EntryStatus::Skipped(_) => self.skipped += 1,
            EntryStatus::Failed(_) => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub sources: Vec<SourceReport>,
    pub cancelled: bool,
    pub dry_run: bool,
}

impl RunReport {
    /// Zero unless a source was abandoned to avoid an account lockout.
    pub fn exit_code(&self) -> u8 {
        if self.sources.iter().any(|s| s.lockout) {
            2
        } else {
            0
        }
    }

    pub fn totals(&self) -> (usize, usize, usize) {
        self.sources.iter().fold((0, 0, 0), |(c, s, f), r| {
            (c + r.complete, s + r.skipped, f + r.failed)
        })
    }
}

pub struct SyncEngine {
    discovery: Discovery,
    executor: FetchExecutor,
    sessions: SessionManager,
    scheduler: Scheduler,
    metadata_dir: PathBuf,
    settings: Settings,
    cancel: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        config: &Config,
        settings: &Settings,
        paths: &DataPaths,
        credentials: Option<Credentials>,
    ) -> Self {
        let scheduler = Scheduler::new(&config.politeness, settings.subscription_delay());
        let retry = config.retry.policy();

        let discovery = Discovery::new(fetcher.clone(), scheduler.clone(), retry)
            .with_page_size(config.discovery.page_size)
            .with_excluded_sections(config.discovery.excluded_sections.clone());
        let executor = FetchExecutor::new(
            fetcher.clone(),
            scheduler.clone(),
            retry,
            ArchiveWriter::new(&paths.archive),
        );
        let sessions = SessionManager::new(
            fetcher,
            scheduler.clone(),
            paths.sessions.clone(),
            credentials,
        )
        .with_max_login_attempts(config.session.max_login_attempts)
        .with_retry_policy(retry);

        Self {
            discovery,
            executor,
            sessions,
            scheduler,
            metadata_dir: paths.metadata.clone(),
            settings: settings.clone(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the run before the next post once raised.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn sessions_mut(&mut self) -> &mut SessionManager {
        &mut self.sessions
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn mode(&self, options: &RunOptions) -> Mode {
        match options.mode {
            RunMode::Update => Mode::Update,
            RunMode::Initial => {
                let date = options
                    .start_date
                    .unwrap_or_else(|| self.settings.start_date(Utc::now().date_naive()));
                Mode::Initial {
                    since: start_of_day(date),
                }
            }
        }
    }

    /// Sync `subscriptions` in order.
    ///
    /// Only a failure to persist progress ends the run with `Err`; every
    /// other problem is contained in its source's report.
    pub async fn run(&mut self, subscriptions: &[Subscription], options: &RunOptions) -> Result<RunReport> {
        let mode = self.mode(options);
        let mut report = RunReport {
            dry_run: options.dry_run,
            ..Default::default()
        };

        for (index, subscription) in subscriptions.iter().enumerate() {
            if self.cancelled() {
                report.cancelled = true;
                break;
            }
            if index > 0 && !options.dry_run {
                self.scheduler.throttle(Scope::Subscription).await;
            }

            info!("Syncing {} ({})", subscription.display_name, subscription.source_url);
            let mut source = SourceReport::new(subscription);

            match self.sync_source(subscription, mode, options, &mut source).await {
                Ok(()) => {}
                Err(e) if e.is_run_fatal() => {
                    error!("Stopping run: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    if e.is_source_fatal() {
                        error!("Abandoning {}: {}", subscription.source_url, e);
                    } else {
                        warn!("Abandoning {}: {}", subscription.source_url, e);
                    }
                    source.lockout = matches!(e, QuireError::LockoutRisk { .. });
                    source.aborted = Some(e.to_string());
                }
            }

            info!(
                complete = source.complete,
                skipped = source.skipped,
                failed = source.failed,
                "Finished {}",
                subscription.source_url
            );
            report.sources.push(source);

            if self.cancelled() {
                report.cancelled = true;
                break;
            }
        }

        if report.cancelled {
            warn!("Run cancelled; progress so far is saved");
        }
        Ok(report)
    }

    async fn sync_source(
        &mut self,
        subscription: &Subscription,
        mode: Mode,
        options: &RunOptions,
        report: &mut SourceReport,
    ) -> Result<()> {
        let mut store = MetadataStore::load(&self.metadata_dir, &subscription.source_url)?;

        let mut session = if options.dry_run {
            self.sessions.peek(subscription)
        } else {
            self.sessions.get_session(subscription).await?
        };

        let mut discovered = self
            .discovery
            .discover_all(subscription, &session, mode.since())
            .await;
        if discovered.session_expired && !options.dry_run {
            warn!(
                "Session for {} expired during discovery, logging in again",
                subscription.source_url
            );
            self.sessions.invalidate(&mut session)?;
            session = self.sessions.get_session(subscription).await?;
            discovered = self
                .discovery
                .discover_all(subscription, &session, mode.since())
                .await;
            if discovered.session_expired {
                self.sessions.invalidate(&mut session)?;
                return Err(QuireError::SessionExpired(subscription.source_url.clone()));
            }
        }
        report.discovered = discovered.posts.len();
        report.failed_pages = discovered.failed_pages;

        let planned = plan(&discovered.posts, &store, mode, options.limit);
        report.planned_count = planned.len();
        info!(
            discovered = report.discovered,
            planned = planned.len(),
            "Planned {}",
            subscription.source_url
        );

        if options.dry_run {
            report.planned = planned;
            return Ok(());
        }

        for record in &planned {
            if self.cancelled() {
                break;
            }

            let entry = self
                .executor
                .fetch_one(subscription, record, &mut session, &mut self.sessions)
                .await?;
            report.tally(&entry.status);
            info!("{} {}", record.post_id, entry.status);
            store.record(entry)?;
        }

        Ok(())
    }
}

pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
