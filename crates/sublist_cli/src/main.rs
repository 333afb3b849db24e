//! SubscribedList CLI
//!
//! Command-line front end for the local event store and the sync pipeline.
//!
//! # Commands
//!
//! - `list` - Show events, most recent first
//! - `add` - Create a local event awaiting remote confirmation
//! - `delete` - Delete a local event
//! - `pending` - Show events not yet confirmed remotely
//! - `sync` - Refresh from a fixture remote
//! - `notify` - Route one push payload against a fixture remote

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// SubscribedList event store and sync tools.
#[derive(Parser)]
#[command(name = "sublist")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the event journal
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Use a throwaway in-memory store instead of a journal
    #[arg(global = true, short, long, conflicts_with = "path")]
    ephemeral: bool,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show events, most recent first
    List {
        /// Maximum number of events to show
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Create a local event
    Add {
        /// Event title
        #[arg(short, long)]
        title: String,

        /// When the event occurs, RFC 3339 (defaults to now)
        #[arg(short, long)]
        at: Option<String>,

        /// Latitude in degrees
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Longitude in degrees
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
    },

    /// Delete a local event
    Delete {
        /// Local event id
        id: String,
    },

    /// Show events not yet confirmed remotely
    Pending {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Publish pending events and refresh from a fixture remote
    Sync {
        /// JSON file holding the remote records
        #[arg(short, long)]
        fixture: PathBuf,
    },

    /// Route one push payload against a fixture remote
    Notify {
        /// JSON file holding the remote records
        #[arg(short, long)]
        fixture: PathBuf,

        /// JSON file holding the push payload
        #[arg(long)]
        payload: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let target = commands::StoreTarget::from_flags(cli.path, cli.ephemeral)?;

    match cli.command {
        Commands::List { limit, format } => {
            commands::events::list(&target, limit, &format)?;
        }
        Commands::Add {
            title,
            at,
            lat,
            lon,
        } => {
            let location = lat.zip(lon);
            commands::events::add(&target, title, at.as_deref(), location)?;
        }
        Commands::Delete { id } => {
            commands::events::delete(&target, &id)?;
        }
        Commands::Pending { format } => {
            commands::events::pending(&target, &format)?;
        }
        Commands::Sync { fixture } => {
            commands::sync::refresh(&target, &fixture).await?;
        }
        Commands::Notify { fixture, payload } => {
            commands::sync::notify(&target, &fixture, &payload).await?;
        }
    }

    Ok(())
}
