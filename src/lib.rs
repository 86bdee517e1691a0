//! # Quire
//!
//! An incremental, polite archiver for subscribed newsletters.
//!
//! ## Architecture
//!
//! Each run walks the enabled subscriptions one at a time through a
//! sequential pipeline:
//!
//! ```text
//! Registry → Session → Discovery → Planner → Executor → Metadata Store
//!                 ↑          ↑                   ↑
//!                 └──── Politeness Scheduler ────┘
//! ```
//!
//! Every fetch attempt is recorded before the next one starts, so re-running
//! the tool is safe: completed posts are never fetched twice and an
//! interrupted run picks up where it stopped.
//!
//! ## Quick Start
//!
//! ```bash
//! # Register a publication
//! quire add example.substack.com --premium
//!
//! # Archive the last year, then keep up
//! quire scrape --initial
//! quire scrape
//!
//! # See what is archived
//! quire status
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together configuration,
/// the data directory layout and the chosen transport.
pub mod app;

/// Headless Chrome transport built on chromiumoxide.
pub mod browser;

/// Command-line interface using clap.
///
/// - `scrape` - Sync every enabled subscription
/// - `initial` / `update` - Sync one source
/// - `list`, `add`, `remove`, `toggle`, `set` - Edit the registry
/// - `status` - Archive counts per source
/// - `session import|list|clear` - Manage stored sessions
pub mod cli;

/// Configuration loaded from `~/.config/quire/config.toml`.
pub mod config;

/// Enumerates a source's posts from its archive listing or feed.
pub mod discovery;

/// Core domain models.
///
/// - [`Subscription`](domain::Subscription): a registered source
/// - [`PostRecord`](domain::PostRecord): a listed post
/// - [`ArchiveEntry`](domain::ArchiveEntry): outcome of one fetch attempt
/// - [`Session`](domain::Session) and [`TokenBlob`](domain::TokenBlob)
pub mod domain;

/// Fetches one post, converts it and writes the documents.
pub mod executor;

/// Transport capability and its reqwest implementation.
///
/// - [`PageFetcher`](fetcher::PageFetcher): `navigate` and `authenticate`
/// - [`HttpFetcher`](fetcher::HttpFetcher): reqwest-based implementation
pub mod fetcher;

/// Single-run lock in the data directory.
pub mod lock;

/// Decides which discovered posts to fetch.
pub mod planner;

/// Request pacing and user agent rotation.
pub mod politeness;

/// The durable subscription list and run settings.
pub mod registry;

/// Retry policy and the retry loop shared by every network operation.
pub mod retry;

/// Authenticated sessions per source, reused across runs.
pub mod session;

/// Per-source metadata store and atomic file replacement.
pub mod store;

/// Run orchestration.
pub mod sync;

#[cfg(test)]
mod test_support;
