//! EdgeSync CLI
//!
//! Runs a sync node and exposes its operator tools.
//!
//! # Commands
//!
//! - `serve` - Serve the sync API and run scheduled passes
//! - `sync` - Run one pass against every peer, or a single peer
//! - `status` - Show pending changes and per-peer checkpoints
//! - `queue` - List pending journal entries
//! - `logs` - Show recent audit entries
//! - `resolve` - Settle a record held in conflict
//! - `clear-queue` - Drop every pending journal entry
//! - `purge` - Delete processed journal entries older than a cutoff
//! - `token` - Issue a signed peer token

mod commands;
mod config;
mod node;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::NodeFile;
use edgesync_engine::DEFAULT_LIMIT;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// EdgeSync node runner and operator tools.
#[derive(Parser)]
#[command(name = "edgesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the node configuration file
    #[arg(global = true, short, long, default_value = "edgesync.json")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the sync API and run scheduled passes
    Serve,

    /// Run a sync pass now
    Sync {
        /// Only sync with this peer
        #[arg(short, long)]
        peer: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show sync status
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List pending journal entries
    Queue {
        /// Maximum number of entries
        #[arg(short, long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show recent audit entries, newest first
    Logs {
        /// Maximum number of entries
        #[arg(short, long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Settle a record held in conflict
    Resolve {
        /// Record type, e.g. inventory.product
        #[arg(short = 't', long)]
        record_type: String,

        /// Record identifier
        #[arg(short = 'i', long)]
        record_id: String,

        /// Resolution (local, remote, merge)
        #[arg(short, long)]
        resolution: String,

        /// Field values for a merge, as a JSON object
        #[arg(short, long)]
        data: Option<String>,
    },

    /// Drop every pending journal entry
    ClearQueue {
        /// Confirm the operation
        #[arg(long)]
        yes: bool,
    },

    /// Delete processed journal entries confirmed before a cutoff
    Purge {
        /// RFC 3339 cutoff timestamp
        #[arg(short, long, conflicts_with = "older_than_days")]
        before: Option<String>,

        /// Cutoff relative to now, in days
        #[arg(long)]
        older_than_days: Option<u32>,
    },

    /// Issue a signed token for a peer
    Token {
        /// Peer key the token is issued to
        #[arg(short, long)]
        peer: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let file = NodeFile::load(&cli.config)?;

    match cli.command {
        Commands::Serve => commands::serve::run(&file),
        Commands::Sync { peer, format } => commands::sync::run(&file, peer.as_deref(), &format),
        Commands::Status { format } => commands::status::run(&file, &format),
        Commands::Queue { limit, format } => commands::queue::run(&file, limit, &format),
        Commands::Logs { limit, format } => commands::logs::run(&file, limit, &format),
        Commands::Resolve {
            record_type,
            record_id,
            resolution,
            data,
        } => commands::resolve::run(&file, &record_type, &record_id, &resolution, data.as_deref()),
        Commands::ClearQueue { yes } => commands::clear_queue::run(&file, yes),
        Commands::Purge {
            before,
            older_than_days,
        } => commands::purge::run(&file, before.as_deref(), older_than_days),
        Commands::Token { peer } => commands::token::run(&file, &peer),
    }
}
