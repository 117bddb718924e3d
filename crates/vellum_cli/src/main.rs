//! VellumDB CLI
//!
//! Command-line tools for redo log files.
//!
//! # Commands
//!
//! - `dump` - Decode and print the records of a redo log
//! - `verify` - Scan a redo log and report stream statistics

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// VellumDB redo log tools.
#[derive(Parser)]
#[command(name = "vellum")]
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
    /// Decode and print every record of a redo log file
    Dump {
        /// Path to the redo log file
        file: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Treat the stream as replicated (verify record terminators)
        #[arg(long)]
        terminators: bool,
    },

    /// Scan a redo log file and report counts and integrity
    Verify {
        /// Path to the redo log file
        file: PathBuf,

        /// Treat the stream as replicated (verify record terminators)
        #[arg(long)]
        terminators: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Commands::Dump {
            file,
            format,
            terminators,
        } => commands::dump::run(&file, &format, terminators),
        Commands::Verify { file, terminators } => commands::verify::run(&file, terminators),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
