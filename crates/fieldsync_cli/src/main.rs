//! FieldSync CLI
//!
//! Command-line tools for FieldSync store maintenance.
//!
//! # Commands
//!
//! - `inspect` - Display store statistics
//! - `pending` - List queued mutations
//! - `verify` - Verify journal integrity and table invariants
//! - `compact` - Rewrite the journal as a single snapshot
//! - `dump-journal` - Dump journal records for debugging

mod commands;

use clap::{Parser, Subcommand};
use commands::OutputFormat;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// FieldSync command-line store tools.
#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store statistics
    Inspect {
        /// List every entity row
        #[arg(short, long)]
        entities: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List queued mutations, oldest first
    Pending {
        /// Only show mutations of this entity
        #[arg(short, long)]
        entity: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Verify journal integrity and table invariants
    Verify,

    /// Rewrite the journal as a single snapshot record
    Compact {
        /// Show what would be done without writing
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Dump journal records for debugging
    DumpJournal {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Skip records before this sequence
        #[arg(short, long, default_value = "0")]
        from_sequence: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { entities, format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, entities, format)?;
        }
        Commands::Pending { entity, format } => {
            let path = cli.path.ok_or("Store path required for pending")?;
            commands::pending::run(&path, entity.as_deref(), format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::DumpJournal {
            limit,
            from_sequence,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for dump-journal")?;
            commands::dump_journal::run(&path, limit, from_sequence, format)?;
        }
        Commands::Version => {
            println!("FieldSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Journal format v{}", fieldsync_core::journal::JOURNAL_VERSION);
        }
    }

    Ok(())
}
