use std::sync::atomic::Ordering;

use tracing::{debug, warn};

use crate::app::{AppContext, FetcherOverrides, Result};
use crate::domain::{
    normalize_source_url, Session, StoredCookie, Subscription, TokenBlob, TokenIssuer, TokenPayload,
};
use crate::lock::RunLock;
use crate::registry::{Settings, Snapshot};
use crate::session::Credentials;
use crate::store::{self, MetadataStore};
use crate::sync::{RunOptions, RunReport, SourceReport};

/// What to run and over which transport.
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    pub options: RunOptions,
    pub overrides: FetcherOverrides,
}

pub async fn scrape(ctx: &AppContext, request: SyncRequest) -> Result<RunReport> {
    let snapshot = ctx.registry()?.snapshot();
    let subscriptions: Vec<Subscription> = snapshot.enabled().cloned().collect();

    if subscriptions.is_empty() {
        println!("No enabled subscriptions");
        return Ok(RunReport {
            dry_run: request.options.dry_run,
            ..Default::default()
        });
    }

    println!("Syncing {} subscriptions...", subscriptions.len());
    run_sync(ctx, &subscriptions, &snapshot.settings, request).await
}

/// Sync a single source, registered or not.
pub async fn sync_one(ctx: &AppContext, url: &str, free: bool, request: SyncRequest) -> Result<RunReport> {
    let snapshot = ctx.registry()?.snapshot();
    let subscription = resolve_subscription(&snapshot, url, free)?;
    if snapshot.find(&subscription.source_url).is_none() {
        println!("{} is not in the registry, syncing it ad hoc", subscription.source_url);
    }

    run_sync(
        ctx,
        std::slice::from_ref(&subscription),
        &snapshot.settings,
        request,
    )
    .await
}

/// The registry entry for `url`, or an ad hoc premium one; `free` forces free.
fn resolve_subscription(snapshot: &Snapshot, url: &str, free: bool) -> Result<Subscription> {
    let source_url = normalize_source_url(url)?;
    let mut subscription = match snapshot.find(&source_url) {
        Some(sub) => sub.clone(),
        None => Subscription::new(&source_url, None, true)?,
    };
    if free {
        subscription.is_premium = false;
    }
    Ok(subscription)
}

async fn run_sync(
    ctx: &AppContext,
    subscriptions: &[Subscription],
    settings: &Settings,
    request: SyncRequest,
) -> Result<RunReport> {
    let _lock = if request.options.dry_run {
        None
    } else {
        let lock = ctx.lock()?;
        debug!("Holding run lock {}", lock.path().display());
        Some(lock)
    };

    let fetcher = ctx.fetcher(&request.overrides)?;
    let mut engine = ctx.engine(fetcher, settings, Credentials::from_env());

    if let Some(ref profile) = request.overrides.browser_profile {
        for sub in subscriptions.iter().filter(|s| s.is_premium) {
            engine.sessions_mut().supply(Session::authenticated(
                &sub.source_url,
                TokenBlob::browser_profile(profile.clone()),
            ))?;
        }
    }

    let cancel = engine.cancel_flag();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current post");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let result = engine.run(subscriptions, &request.options).await;
    interrupt.abort();

    let report = result?;
    print_report(&report);
    Ok(report)
}

fn print_report(report: &RunReport) {
    for source in &report.sources {
        if report.dry_run {
            print_plan(source);
        } else {
            println!(
                "{}: {} complete, {} skipped, {} failed",
                source.display_name, source.complete, source.skipped, source.failed
            );
        }
        if source.failed_pages > 0 {
            println!("  {} listing pages could not be read", source.failed_pages);
        }
        if let Some(ref reason) = source.aborted {
            eprintln!("  Aborted: {}", reason);
        }
    }

    if !report.dry_run {
        let (complete, skipped, failed) = report.totals();
        println!(
            "Sync complete: {} complete, {} skipped, {} failed",
            complete, skipped, failed
        );
    }
    if report.cancelled {
        println!("Run cancelled; run again to resume");
    }
}

fn print_plan(source: &SourceReport) {
    println!(
        "{}: {} discovered, {} to fetch",
        source.display_name, source.discovered, source.planned_count
    );
    for post in &source.planned {
        let marker = if post.is_premium { "$" } else { " " };
        println!(
            "  {} {} {}",
            post.publish_date.format("%Y-%m-%d"),
            marker,
            post.title
        );
    }
}

pub fn list_subscriptions(ctx: &AppContext) -> Result<()> {
    let registry = ctx.registry()?;

    if registry.list().is_empty() {
        println!("No subscriptions");
    }

    for sub in registry.list() {
        let marker = if sub.is_enabled { "*" } else { " " };
        let kind = if sub.is_premium { "premium" } else { "free" };
        println!("{} {} ({})\n    {}", marker, sub.display_name, kind, sub.source_url);
    }

    let settings = registry.settings();
    println!("\nSettings:");
    println!(
        "  default_start_date = {}",
        settings
            .default_start_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unset (12 months back)".to_string())
    );
    println!(
        "  delay_between_subscriptions = {}",
        settings.delay_between_subscriptions
    );
    Ok(())
}

pub fn add_subscription(ctx: &AppContext, url: &str, name: Option<&str>, premium: bool) -> Result<()> {
    let mut registry = ctx.registry()?;
    let sub = registry.add(url, name, premium)?;
    println!("Added {} ({})", sub.display_name, sub.source_url);
    Ok(())
}

pub fn remove_subscription(ctx: &AppContext, url: &str) -> Result<()> {
    let mut registry = ctx.registry()?;
    let sub = registry.remove(url)?;
    println!("Removed {} ({})", sub.display_name, sub.source_url);
    Ok(())
}

pub fn toggle_subscription(ctx: &AppContext, url: &str) -> Result<()> {
    let mut registry = ctx.registry()?;
    let enabled = registry.toggle(url)?;
    println!(
        "{} {}",
        if enabled { "Enabled" } else { "Disabled" },
        normalize_source_url(url)?
    );
    Ok(())
}

pub fn set_setting(ctx: &AppContext, key: &str, value: &str) -> Result<()> {
    let mut registry = ctx.registry()?;
    registry.update_setting(key, value)?;
    println!("Set {} = {}", key, value);
    Ok(())
}

/// Per-source archive counts, registered sources first.
pub fn status(ctx: &AppContext) -> Result<()> {
    let registry = ctx.registry()?;
    let stores = store::load_all(&ctx.paths.metadata)?;

    if let Some(pid) = RunLock::holder(&ctx.paths.root) {
        println!("A run is in progress (PID {})\n", pid);
    }

    if registry.list().is_empty() && stores.is_empty() {
        println!("Nothing archived yet");
        return Ok(());
    }

    for sub in registry.list() {
        match stores.iter().find(|s| s.source_url() == sub.source_url) {
            Some(store) => print_store(&sub.display_name, store),
            None => println!("{}\n    {}\n    never synced", sub.display_name, sub.source_url),
        }
    }

    for store in stores
        .iter()
        .filter(|s| registry.find(s.source_url()).is_none())
    {
        print_store("(not registered)", store);
    }
    Ok(())
}

fn print_store(name: &str, store: &MetadataStore) {
    let summary = store.summary();
    let last_run = store
        .last_run_at()
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "never".to_string());
    println!(
        "{}\n    {}\n    {} complete, {} skipped, {} failed (last run {})",
        name,
        store.source_url(),
        summary.complete,
        summary.skipped,
        summary.failed,
        last_run
    );
}

pub fn import_session(ctx: &AppContext, url: &str, cookies: Vec<StoredCookie>) -> Result<()> {
    let source_url = normalize_source_url(url)?;
    let count = cookies.len();

    let mut sessions = ctx.sessions(ctx.fetcher(&FetcherOverrides::default())?);
    sessions.supply(Session::authenticated(
        &source_url,
        TokenBlob::cookies(TokenIssuer::External, cookies),
    ))?;

    println!("Imported {} cookies for {}", count, source_url);
    Ok(())
}

pub fn list_sessions(ctx: &AppContext) -> Result<()> {
    let sessions = ctx.sessions(ctx.fetcher(&FetcherOverrides::default())?);
    let tokens = sessions.list()?;

    if tokens.is_empty() {
        println!("No stored sessions");
        return Ok(());
    }

    for (key, token) in tokens {
        let issuer = match token.issuer {
            TokenIssuer::Login => "login",
            TokenIssuer::External => "imported",
        };
        let payload = match token.payload {
            TokenPayload::Cookies { ref cookies } => format!("{} cookies", cookies.len()),
            TokenPayload::BrowserProfile { ref path } => format!("browser profile {}", path.display()),
        };
        println!(
            "{}\n    {}, {}, obtained {}",
            key,
            issuer,
            payload,
            token.obtained_at.format("%Y-%m-%d %H:%M UTC")
        );
    }
    Ok(())
}

pub fn clear_session(ctx: &AppContext, url: &str) -> Result<()> {
    let mut sessions = ctx.sessions(ctx.fetcher(&FetcherOverrides::default())?);
    if sessions.clear(url)? {
        println!("Cleared session for {}", normalize_source_url(url)?);
    } else {
        println!("No stored session for {}", normalize_source_url(url)?);
    }
    Ok(())
}
