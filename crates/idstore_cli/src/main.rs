//! idstore CLI
//!
//! Command-line maintenance tools for a file-backed idstore directory.
//!
//! # Commands
//!
//! - `inspect` - Display object types, record counts and revisions
//! - `export` - Write a JSON dump of the store
//! - `import` - Restore a JSON dump into the store
//! - `verify` - Check a dump file without importing it
//! - `hotfix` - Wrap legacy single values into arrays

mod commands;

use clap::{Parser, Subcommand};
use commands::PriorityArg;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// idstore command-line maintenance tools.
#[derive(Parser)]
#[command(name = "idstore")]
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
    /// Display object types and record counts
    Inspect {
        /// List every record
        #[arg(short, long)]
        records: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Write a JSON dump of the store
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only export these object types
        #[arg(short, long, value_delimiter = ',')]
        types: Vec<String>,

        /// Restore priority of a type, as TYPE=N
        #[arg(short = 'P', long = "priority")]
        priorities: Vec<PriorityArg>,

        /// Write compact JSON
        #[arg(short, long)]
        compact: bool,
    },

    /// Restore a JSON dump into the store
    Import {
        /// Dump file to read
        input: PathBuf,

        /// Keep existing records instead of replacing them
        #[arg(short, long)]
        merge: bool,

        /// Restore priority of a type, as TYPE=N
        #[arg(short = 'P', long = "priority")]
        priorities: Vec<PriorityArg>,
    },

    /// Check a dump file without importing it
    Verify {
        /// Dump file to read
        input: PathBuf,
    },

    /// Wrap legacy single values into arrays
    Hotfix {
        /// Object type to rewrite
        #[arg(short = 't', long = "type")]
        object_type: String,

        /// Dot-separated field path; `*` walks arrays
        #[arg(short, long)]
        field: String,

        /// Skip malformed records instead of failing
        #[arg(long)]
        tolerant: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
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
        Commands::Inspect { records, format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, records, &format)?;
        }
        Commands::Export {
            output,
            types,
            priorities,
            compact,
        } => {
            let path = cli.path.ok_or("Store path required for export")?;
            commands::export::run(&path, output.as_deref(), &types, &priorities, compact)?;
        }
        Commands::Import {
            input,
            merge,
            priorities,
        } => {
            let path = cli.path.ok_or("Store path required for import")?;
            commands::import::run(&path, &input, merge, &priorities)?;
        }
        Commands::Verify { input } => {
            commands::verify::run(&input)?;
        }
        Commands::Hotfix {
            object_type,
            field,
            tolerant,
        } => {
            let path = cli.path.ok_or("Store path required for hotfix")?;
            commands::hotfix::run(&path, &object_type, &field, tolerant)?;
        }
        Commands::Version => {
            println!("idstore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("dump format v{}", idstore_core::export::FORMAT_VERSION);
            println!("snapshot format v{}", idstore_storage::SNAPSHOT_VERSION);
        }
    }

    Ok(())
}
