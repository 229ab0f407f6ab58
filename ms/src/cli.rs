//! CLI definitions for the memberstore inspection tool

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// memberstore - inspect roster and ledger files
#[derive(Parser)]
#[command(name = "memberstore", about = "Inspect memberdaemon roster and ledger storage")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the store directory
    #[arg(short, long)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List harvested candidate usernames
    Candidates,

    /// List usernames that have already been attempted
    Checkpoint,

    /// List candidates not yet attempted
    Pending,

    /// List invitation ledger records
    Ledger {
        /// Only show records for this username
        #[arg(short, long)]
        username: Option<String>,
    },

    /// Show entry counts for all files
    Stats,
}
