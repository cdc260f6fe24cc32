//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod helpers;
mod ingest;
mod init;
mod retry;
mod serve;
mod status;

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::config::load_settings;
use crate::models::{JobKind, RecordSource};

/// Portal selector for CLI arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SourceArg {
    /// Procurement awards portal
    Contracts,
    /// Research topics portal
    Topics,
}

impl From<SourceArg> for RecordSource {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Contracts => RecordSource::Contracts,
            SourceArg::Topics => RecordSource::Topics,
        }
    }
}

/// Sweep kind selector for CLI arguments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum KindArg {
    /// Sweep the full configured historical range
    Full,
    /// Sweep only the trailing few days
    #[default]
    Recent,
}

impl From<KindArg> for JobKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Full => JobKind::Full,
            KindArg::Recent => JobKind::Recent,
        }
    }
}

#[derive(Parser)]
#[command(name = "govharvest")]
#[command(about = "Resumable ingestion for government contract and topic portals")]
#[command(version)]
pub struct Cli {
    /// Data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Run an ingestion sweep for one portal
    Ingest {
        /// Portal to sweep
        #[arg(value_enum)]
        source: SourceArg,
        /// Sweep kind
        #[arg(short, long, value_enum, default_value = "recent")]
        kind: KindArg,
        /// Number of days to sweep (overrides the kind's default span)
        #[arg(long)]
        days: Option<i64>,
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// End date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Stop after this many units (0 = unlimited)
        #[arg(short, long, default_value = "0")]
        limit: u32,
    },

    /// Replay failed items for one portal
    Retry {
        /// Portal to retry
        #[arg(value_enum)]
        source: SourceArg,
        /// Only retry items from this unit date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Retry at most this many items (0 = unlimited)
        #[arg(short, long, default_value = "0")]
        limit: u32,
    },

    /// Show store counts, unit progress, failed items, and the latest run
    Status {
        /// Portal to filter by (shows both when omitted)
        #[arg(value_enum)]
        source: Option<SourceArg>,
    },

    /// Run the trigger/status HTTP server
    Serve {
        /// Address to bind to: PORT, HOST, or HOST:PORT
        /// (defaults to the configured server bind address)
        bind: Option<String>,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.data_dir).await;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Ingest {
            source,
            kind,
            days,
            from,
            to,
            limit,
        } => {
            ingest::cmd_ingest(&settings, source.into(), kind.into(), days, from, to, limit).await
        }
        Commands::Retry {
            source,
            date,
            limit,
        } => retry::cmd_retry(&settings, source.into(), date, limit).await,
        Commands::Status { source } => {
            status::cmd_status(&settings, source.map(Into::into)).await
        }
        Commands::Serve { bind } => serve::cmd_serve(&settings, bind.as_deref()).await,
    }
}
