//! marksync CLI
//!
//! Command-line tools for the marksync bookmark sync engine.
//!
//! # Commands
//!
//! - `decode` - Decode raw change payloads and report what the engine would do
//! - `demo` - Run a scripted sync session against the in-memory backend

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// marksync command-line tools.
#[derive(Parser)]
#[command(name = "marksync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Principal whose bookmarks are synced
    #[arg(global = true, short, long, default_value = "demo-user")]
    owner: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode raw change payloads (one JSON document per line)
    Decode {
        /// Input file; reads stdin when omitted
        input: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run a scripted session: load, live events, outage, reconnect
    Demo {
        /// Seconds between reconnect attempts
        #[arg(short, long, default_value = "5")]
        retry_secs: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
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
        Commands::Decode { input, format } => {
            commands::decode::run(input.as_deref(), &cli.owner, &format)?;
        }
        Commands::Demo { retry_secs, format } => {
            commands::demo::run(&cli.owner, retry_secs, &format)?;
        }
        Commands::Version => {
            println!("marksync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
