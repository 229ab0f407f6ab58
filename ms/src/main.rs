use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use memberstore::MemberStore;
use memberstore::cli::{Cli, Command};
use memberstore::config::Config;

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let store_path = cli.store.unwrap_or(config.store_path);

    info!("memberstore starting");

    let store = MemberStore::open(&store_path)
        .context(format!("Failed to open store at {}", store_path.display()))?;

    match cli.command {
        Command::Candidates => {
            for name in store.candidates().load()? {
                println!("{}", name);
            }
        }
        Command::Checkpoint => {
            for name in store.checkpoint().load()? {
                println!("{}", name);
            }
        }
        Command::Pending => {
            let candidates = store.candidates().load()?;
            let checkpoint = store.checkpoint().load()?;
            for name in candidates.difference(&checkpoint) {
                println!("{}", name);
            }
        }
        Command::Ledger { username } => {
            let entries = store.ledger().entries()?;
            for entry in entries {
                if let Some(ref filter) = username
                    && &entry.username != filter
                {
                    continue;
                }
                println!(
                    "{} {} {}",
                    entry.username.cyan(),
                    entry.destination.yellow(),
                    entry.timestamp.dimmed()
                );
            }
        }
        Command::Stats => {
            let candidates = store.candidates().len()?;
            let checkpoint = store.checkpoint().len()?;
            let ledger = store.ledger().len()?;
            println!("Store: {}", store.base().display().to_string().cyan());
            println!("  Candidates: {}", candidates);
            println!("  Checkpoint: {}", checkpoint);
            println!("  Pending:    {}", candidates.saturating_sub(checkpoint));
            println!("  Ledger:     {}", ledger);
        }
    }

    Ok(())
}
