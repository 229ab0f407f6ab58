//! CLI command definitions and subcommands

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// MemberDaemon - group membership automation daemon
#[derive(Parser)]
#[command(
    name = "memberdaemon",
    about = "Harvests group rosters and paces member invitations",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage the memberdaemon daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Start an automation job (harvest sources, invite into target)
    Start {
        /// Account to run the job under
        #[arg(short, long)]
        account: String,

        /// Source group to harvest (repeatable)
        #[arg(short, long = "source", required = true)]
        sources: Vec<String>,

        /// Target group to invite candidates into
        #[arg(short, long)]
        target: String,

        /// Minimum per-item delay in seconds
        #[arg(long)]
        delay_min: Option<u64>,

        /// Maximum per-item delay in seconds
        #[arg(long)]
        delay_max: Option<u64>,

        /// Cap on candidates processed this run
        #[arg(long)]
        max_members: Option<u64>,
    },

    /// Request a running job to stop
    Stop {
        /// Job ID
        id: String,
    },

    /// Show one job's status and counters
    Job {
        /// Job ID
        id: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List job records
    Jobs {
        /// Filter by status (running, stopped, completed, failed)
        #[arg(short, long)]
        status: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show aggregate statistics
    Stats {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Manage accounts
    Accounts {
        #[command(subcommand)]
        command: AccountCommand,
    },

    /// Show daemon logs
    Logs {
        /// Follow log output (like tail -f)
        #[arg(short, long)]
        follow: bool,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
    },

    /// Internal: Run as daemon process (used by `daemon start`)
    #[command(hide = true)]
    RunDaemon,
}

/// Daemon management subcommands
#[derive(Debug, Subcommand)]
pub enum DaemonCommand {
    /// Start the daemon
    Start {
        /// Don't fork to background (run in foreground)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop the daemon
    Stop,

    /// Check daemon status
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Ping the daemon to check if it's alive and responsive
    Ping,
}

/// Account management subcommands
#[derive(Debug, Subcommand)]
pub enum AccountCommand {
    /// Register a new account
    Add {
        /// Phone number, including country prefix
        phone_number: String,
    },

    /// List registered accounts
    List,

    /// Make an account the active one
    Activate {
        /// Account ID
        id: String,
    },

    /// Remove an account
    Remove {
        /// Account ID
        id: String,
    },
}

/// Output format for commands that print records
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON
    Json,
}

/// Log file location, shared by the daemon and `logs`
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("memberdaemon")
        .join("logs")
        .join("memberdaemon.log")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_start_command_repeatable_sources() {
        let cli = Cli::try_parse_from([
            "memberdaemon",
            "start",
            "--account",
            "acct-1",
            "--source",
            "g1",
            "--source",
            "g2",
            "--target",
            "dest",
        ])
        .unwrap();

        match cli.command {
            Command::Start {
                account,
                sources,
                target,
                ..
            } => {
                assert_eq!(account, "acct-1");
                assert_eq!(sources, vec!["g1".to_string(), "g2".to_string()]);
                assert_eq!(target, "dest");
            }
            other => panic!("Expected Start, got {:?}", other),
        }
    }

    #[test]
    fn test_log_path_under_data_dir() {
        let path = get_log_path();
        assert!(path.ends_with("memberdaemon/logs/memberdaemon.log"));
    }
}
