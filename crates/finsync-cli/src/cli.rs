//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Finsync - Sync bank transactions into monthly tables
#[derive(Parser)]
#[command(name = "finsync")]
#[command(about = "Sync open-banking transactions into per-month workspace tables", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config override file (defaults to FINSYNC_CONFIG, then ~/.config/finsync/finsync.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sync one user's transactions
    ///
    /// Dates accept YYYY-MM-DD or RFC 3339. Without dates the previous
    /// calendar month is synced.
    Sync {
        /// User id from the users file
        #[arg(short, long)]
        user: String,

        /// First day of the range
        #[arg(long)]
        start: Option<String>,

        /// Last day of the range
        #[arg(long)]
        end: Option<String>,
    },

    /// Sync every configured user concurrently
    SyncAll {
        /// First day of the range
        #[arg(long)]
        start: Option<String>,

        /// Last day of the range
        #[arg(long)]
        end: Option<String>,
    },

    /// List configured users (without credentials)
    Users,

    /// Show the resolved configuration (secrets redacted)
    Config,
}
