use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use quire::app::{AppContext, FetcherOverrides};
use quire::cli::commands::{self, SyncRequest};
use quire::cli::{Cli, Commands, SessionCommand};
use quire::config::Config;
use quire::sync::{RunMode, RunOptions};

fn main() -> anyhow::Result<ExitCode> {
    // Credentials may come from a .env file in the working directory
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quire=info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let ctx = AppContext::new(config, cli.data_dir)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let report = match cli.command {
        Commands::Scrape {
            initial,
            update: _,
            start_date,
            dry_run,
            show_browser,
            limit,
            browser_profile,
        } => {
            let request = SyncRequest {
                options: RunOptions {
                    mode: if initial { RunMode::Initial } else { RunMode::Update },
                    start_date,
                    dry_run,
                    limit,
                },
                overrides: FetcherOverrides {
                    show_browser,
                    browser_profile,
                },
            };
            Some(runtime.block_on(commands::scrape(&ctx, request))?)
        }
        Commands::Initial {
            url,
            start_date,
            free,
            limit,
            dry_run,
            show_browser,
        } => {
            let request = SyncRequest {
                options: RunOptions {
                    mode: RunMode::Initial,
                    start_date,
                    dry_run,
                    limit,
                },
                overrides: FetcherOverrides {
                    show_browser,
                    ..Default::default()
                },
            };
            Some(runtime.block_on(commands::sync_one(&ctx, &url, free, request))?)
        }
        Commands::Update {
            url,
            free,
            dry_run,
            show_browser,
        } => {
            let request = SyncRequest {
                options: RunOptions {
                    mode: RunMode::Update,
                    dry_run,
                    ..Default::default()
                },
                overrides: FetcherOverrides {
                    show_browser,
                    ..Default::default()
                },
            };
            Some(runtime.block_on(commands::sync_one(&ctx, &url, free, request))?)
        }
        Commands::List => {
            commands::list_subscriptions(&ctx)?;
            None
        }
        Commands::Add { url, name, premium } => {
            commands::add_subscription(&ctx, &url, name.as_deref(), premium)?;
            None
        }
        Commands::Remove { url } => {
            commands::remove_subscription(&ctx, &url)?;
            None
        }
        Commands::Toggle { url } => {
            commands::toggle_subscription(&ctx, &url)?;
            None
        }
        Commands::Set { key, value } => {
            commands::set_setting(&ctx, &key, &value)?;
            None
        }
        Commands::Status => {
            commands::status(&ctx)?;
            None
        }
        Commands::Session { action } => {
            match action {
                SessionCommand::Import { url, cookies } => {
                    commands::import_session(&ctx, &url, cookies)?
                }
                SessionCommand::List => commands::list_sessions(&ctx)?,
                SessionCommand::Clear { url } => commands::clear_session(&ctx, &url)?,
            }
            None
        }
    };

    Ok(report
        .map(|r| ExitCode::from(r.exit_code()))
        .unwrap_or(ExitCode::SUCCESS))
}
