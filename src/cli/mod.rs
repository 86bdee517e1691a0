pub mod commands;

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::domain::StoredCookie;
use crate::registry::parse_date;

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "Incremental, polite archiver for subscribed newsletters", long_about = None)]
pub struct Cli {
    /// Directory holding the registry, metadata, sessions and archive
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Configuration file (default: ~/.config/quire/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sync every enabled subscription
    Scrape {
        /// Archive everything since the start date that is not yet complete
        #[arg(long, conflicts_with = "update")]
        initial: bool,
        /// Archive only posts never seen before (default)
        #[arg(long)]
        update: bool,
        /// Lower bound for --initial, YYYY-MM-DD
        #[arg(long, value_name = "DATE", value_parser = start_date, requires = "initial")]
        start_date: Option<NaiveDate>,
        /// Print the fetch plan without fetching or recording anything
        #[arg(long)]
        dry_run: bool,
        /// Use a visible Chrome window as the transport
        #[arg(long)]
        show_browser: bool,
        /// Fetch at most N posts per subscription
        #[arg(long, value_name = "N")]
        limit: Option<usize>,
        /// Reuse an already logged-in Chrome profile for premium sources
        #[arg(long, value_name = "DIR")]
        browser_profile: Option<PathBuf>,
    },
    /// List subscriptions and settings
    List,
    /// Add a subscription
    Add {
        /// Publication URL, e.g. example.substack.com
        url: String,
        /// Display name (default: the publication's short name)
        #[arg(long)]
        name: Option<String>,
        /// Paid subscription; log in before fetching
        #[arg(long)]
        premium: bool,
    },
    /// Remove a subscription
    Remove { url: String },
    /// Enable or disable a subscription
    Toggle { url: String },
    /// Change a registry setting (default_start_date, delay_between_subscriptions)
    Set { key: String, value: String },
    /// Initial sync of one source
    Initial {
        url: String,
        /// Lower bound, YYYY-MM-DD
        #[arg(long, value_name = "DATE", value_parser = start_date)]
        start_date: Option<NaiveDate>,
        /// Treat the source as free: never log in
        #[arg(long)]
        free: bool,
        /// Fetch at most N posts
        #[arg(long, value_name = "N")]
        limit: Option<usize>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        show_browser: bool,
    },
    /// Fetch posts of one source that were never seen before
    Update {
        url: String,
        #[arg(long)]
        free: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        show_browser: bool,
    },
    /// Show archive counts per source
    Status,
    /// Manage stored sessions
    Session {
        #[command(subcommand)]
        action: SessionCommand,
    },
}

#[derive(Subcommand)]
pub enum SessionCommand {
    /// Store a session taken from a logged-in browser
    Import {
        url: String,
        /// Cookie to send, repeatable
        #[arg(long = "cookie", value_name = "NAME=VALUE", required = true, value_parser = cookie)]
        cookies: Vec<StoredCookie>,
    },
    /// List stored sessions
    List,
    /// Forget the stored session of a source
    Clear { url: String },
}

fn start_date(value: &str) -> Result<NaiveDate, String> {
    parse_date(value).map_err(|_| format!("expected YYYY-MM-DD, got '{}'", value))
}

fn cookie(value: &str) -> Result<StoredCookie, String> {
    let (name, value) = value
        .split_once('=')
        .ok_or_else(|| "expected NAME=VALUE".to_string())?;
    let name = name.trim();
    if name.is_empty() {
        return Err("cookie name is empty".into());
    }
    Ok(StoredCookie {
        name: name.to_string(),
        value: value.trim().to_string(),
        domain: None,
    })
}
