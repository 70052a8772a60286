//! Finsync CLI - bank transactions into monthly workspace tables
//!
//! Usage:
//!   finsync sync --user ID [--start DATE] [--end DATE]   Sync one user
//!   finsync sync-all [--start DATE] [--end DATE]         Sync every user
//!   finsync users                                        List configured users
//!   finsync config                                       Show resolved configuration

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact().with_writer(std::io::stderr))
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Sync { user, start, end } => {
            commands::cmd_sync(&config, &user, start.as_deref(), end.as_deref()).await
        }
        Commands::SyncAll { start, end } => {
            commands::cmd_sync_all(&config, start.as_deref(), end.as_deref()).await
        }
        Commands::Users => commands::cmd_users(&config).await,
        Commands::Config => commands::cmd_config(&config),
    }
}
