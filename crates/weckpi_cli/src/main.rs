//! WeckPi CLI
//!
//! Command-line tools for working with WeckPi state snapshots.
//!
//! # Commands
//!
//! - `schema` - List the declared fields of the state tree
//! - `inspect` - Apply a snapshot to a fresh store and print every field
//! - `verify` - Check whether a snapshot would be accepted
//! - `next-alarm` - Compute the next alarm from a snapshot

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// WeckPi state tools.
#[derive(Parser)]
#[command(name = "weckpi")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List declared fields, kinds and defaults
    Schema {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Apply a snapshot to a fresh store and print every field
    Inspect {
        /// Snapshot file (JSON)
        snapshot: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check whether a snapshot would be accepted
    Verify {
        /// Snapshot file (JSON)
        snapshot: PathBuf,
    },

    /// Compute the next alarm from a snapshot
    NextAlarm {
        /// Snapshot file (JSON)
        snapshot: PathBuf,

        /// Reference time (YYYY-MM-DDTHH:MM[:SS]); defaults to now
        #[arg(short, long)]
        at: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Schema { format } => commands::schema::run(&format)?,
        Commands::Inspect { snapshot, format } => commands::inspect::run(&snapshot, &format)?,
        Commands::Verify { snapshot } => commands::verify::run(&snapshot)?,
        Commands::NextAlarm { snapshot, at } => {
            commands::next_alarm::run(&snapshot, at.as_deref())?
        }
    }

    Ok(())
}
