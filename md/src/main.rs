//! MemberDaemon - group membership automation daemon
//!
//! CLI entry point for the daemon and its job-control commands.

use std::fs;
use std::io::{BufRead, BufReader};
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use memberdaemon::cli::{AccountCommand, Cli, Command, DaemonCommand, OutputFormat, get_log_path};
use memberdaemon::client::create_client;
use memberdaemon::config::Config;
use memberdaemon::daemon::DaemonManager;
use memberdaemon::domain::{Account, JobSpec, JobStatus};
use memberdaemon::ipc::{self, DaemonClient, DaemonMessage, DaemonResponse, JobSummary};
use memberdaemon::job::{JobManager, JobManagerConfig};
use memberdaemon::state::StateManager;
use memberstore::MemberStore;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            other => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    // Append: the CLI and a running daemon share this file
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(Arc::new(log_file))
        .with_ansi(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref())
        .context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Daemon { command } => match command {
            DaemonCommand::Start { foreground } => cmd_daemon_start(&config, foreground).await,
            DaemonCommand::Stop => cmd_daemon_stop().await,
            DaemonCommand::Status { format } => cmd_daemon_status(format).await,
            DaemonCommand::Ping => cmd_ping().await,
        },
        Command::Start {
            account,
            sources,
            target,
            delay_min,
            delay_max,
            max_members,
        } => {
            let spec = JobSpec {
                account_id: account,
                source_groups: sources,
                target_group: target,
                delay_min: delay_min.unwrap_or(config.jobs.delay_min),
                delay_max: delay_max.unwrap_or(config.jobs.delay_max),
                max_members: max_members.or(Some(config.jobs.max_members)),
            };
            cmd_start(spec).await
        }
        Command::Stop { id } => cmd_stop(&id).await,
        Command::Job { id, format } => cmd_job(&config, &id, format).await,
        Command::Jobs { status, format } => cmd_jobs(&config, status.as_deref(), format).await,
        Command::Stats { format } => cmd_stats(&config, format).await,
        Command::Accounts { command } => cmd_accounts(&config, command).await,
        Command::Logs { follow, lines } => cmd_logs(follow, lines).await,
        Command::RunDaemon => cmd_run_daemon(&config).await,
    }
}

/// Start the daemon
async fn cmd_daemon_start(config: &Config, foreground: bool) -> Result<()> {
    let daemon = DaemonManager::new();

    if daemon.is_running() {
        if let Some(pid) = daemon.running_pid() {
            println!("MemberDaemon is already running (PID: {})", pid);
        } else {
            println!("MemberDaemon is already running");
        }
        return Ok(());
    }

    if foreground {
        println!("Starting MemberDaemon in foreground mode...");
        run_daemon(config).await
    } else {
        let pid = daemon.start()?;
        println!("MemberDaemon started (PID: {})", pid);
        Ok(())
    }
}

/// Stop the daemon
///
/// Tries IPC shutdown first for graceful stop, falls back to SIGTERM if IPC
/// fails.
async fn cmd_daemon_stop() -> Result<()> {
    let daemon = DaemonManager::new();

    if !daemon.is_running() {
        println!("MemberDaemon is not running");
        return Ok(());
    }

    let pid = daemon.running_pid();

    let client = DaemonClient::new();
    if client.socket_exists() {
        match client.shutdown().await {
            Ok(()) => {
                // Wait for process to exit
                let mut attempts = 0;
                while daemon.is_running() && attempts < 50 {
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    attempts += 1;
                }
                if !daemon.is_running() {
                    if let Some(pid) = pid {
                        println!("MemberDaemon stopped gracefully via IPC (was PID: {})", pid);
                    } else {
                        println!("MemberDaemon stopped gracefully via IPC");
                    }
                    return Ok(());
                }
                debug!("cmd_daemon_stop: IPC shutdown timed out, falling back to SIGTERM");
            }
            Err(e) => {
                debug!(error = %e, "cmd_daemon_stop: IPC shutdown failed, falling back to SIGTERM");
            }
        }
    }

    daemon.stop()?;
    if let Some(pid) = pid {
        println!("MemberDaemon stopped (was PID: {})", pid);
    } else {
        println!("MemberDaemon stopped");
    }
    Ok(())
}

/// Show daemon status
async fn cmd_daemon_status(format: OutputFormat) -> Result<()> {
    let daemon = DaemonManager::new();
    let status = daemon.status();

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "running": status.running,
                "pid": status.pid,
                "pid_file": status.pid_file.to_string_lossy()
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            println!("MemberDaemon Status");
            println!("-------------------");
            if status.running {
                println!("Status: running");
                if let Some(pid) = status.pid {
                    println!("PID: {}", pid);
                }
            } else {
                println!("Status: stopped");
            }
            println!("PID file: {}", status.pid_file.display());
        }
    }

    Ok(())
}

/// Ping the daemon via IPC to check if it's alive and responsive
async fn cmd_ping() -> Result<()> {
    let daemon = DaemonManager::new();
    if !daemon.is_running() {
        println!("MemberDaemon is not running");
        return Ok(());
    }

    let client = DaemonClient::new();
    if !client.socket_exists() {
        println!("Daemon PID file exists but IPC socket not found");
        println!("The daemon may be starting up or in an inconsistent state");
        return Ok(());
    }

    match client.ping().await {
        Ok(version) => {
            println!("Daemon is alive and responsive");
            println!("Version: {}", version);
        }
        Err(e) => {
            println!("Daemon PID file exists but not responding to IPC");
            println!("Error: {}", e);
        }
    }

    Ok(())
}

/// Start an automation job via the daemon
async fn cmd_start(spec: JobSpec) -> Result<()> {
    let client = DaemonClient::new();
    if !client.socket_exists() {
        return Err(eyre::eyre!(
            "Daemon is not running. Start it with: md daemon start"
        ));
    }

    let id = client.start_job(spec).await?;
    println!("Job started: {}", id);
    println!("Watch progress with: md job {}", id);
    Ok(())
}

/// Request a running job to stop
async fn cmd_stop(id: &str) -> Result<()> {
    let client = DaemonClient::new();
    if !client.socket_exists() {
        return Err(eyre::eyre!(
            "Daemon is not running. Start it with: md daemon start"
        ));
    }

    client.stop_job(id).await?;
    println!("Stop requested for job {}", id);
    println!("The pipeline halts at its next checkpoint; progress so far is kept.");
    Ok(())
}

fn print_job_summary(job: &JobSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(job)?),
        OutputFormat::Text => {
            println!("Job:    {}", job.id);
            println!("Status: {}", job.status);
            println!("Target: {}", job.target_group);
            println!("Added:  {}", job.added);
            println!("Errors: {}", job.errors);
        }
    }
    Ok(())
}

/// Show one job's status and counters
///
/// Asks the daemon when it is up, otherwise reads the database directly.
async fn cmd_job(config: &Config, id: &str, format: OutputFormat) -> Result<()> {
    let client = DaemonClient::new();
    if client.socket_exists()
        && let Ok(job) = client.get_job(id).await
    {
        return print_job_summary(&job, format);
    }

    let state = StateManager::spawn(config.storage.db_path())?;
    let job = state.get_job_required(id).await?;
    print_job_summary(
        &JobSummary {
            id: job.id.clone(),
            status: job.status.to_string(),
            target_group: job.target_group.clone(),
            added: job.added,
            errors: job.errors,
        },
        format,
    )
}

/// List job records
async fn cmd_jobs(config: &Config, status: Option<&str>, format: OutputFormat) -> Result<()> {
    let status_filter: Option<JobStatus> = match status {
        Some(s) => Some(s.parse().map_err(|e: String| eyre::eyre!(e))?),
        None => None,
    };

    let state = StateManager::spawn(config.storage.db_path())?;
    let jobs = state.list_jobs(status_filter).await?;

    match format {
        OutputFormat::Json => {
            let summaries: Vec<JobSummary> = jobs
                .iter()
                .map(|j| JobSummary {
                    id: j.id.clone(),
                    status: j.status.to_string(),
                    target_group: j.target_group.clone(),
                    added: j.added,
                    errors: j.errors,
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
        OutputFormat::Text => {
            if jobs.is_empty() {
                println!(
                    "No jobs found{}",
                    status.map(|s| format!(" with status '{}'", s)).unwrap_or_default()
                );
            } else {
                println!("{:<38} {:<10} {:<20} {:>6} {:>6}", "ID", "STATUS", "TARGET", "ADDED", "ERRORS");
                println!("{}", "-".repeat(84));
                for job in jobs {
                    println!(
                        "{:<38} {:<10} {:<20} {:>6} {:>6}",
                        job.id, job.status, job.target_group, job.added, job.errors
                    );
                }
            }
        }
    }

    Ok(())
}

/// Show aggregate statistics
async fn cmd_stats(config: &Config, format: OutputFormat) -> Result<()> {
    let state = StateManager::spawn(config.storage.db_path())?;
    let stats = state.stats().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Text => {
            println!("MemberDaemon Statistics");
            println!("-----------------------");
            println!("Today:");
            println!("  Runs:   {}", stats.runs_today);
            println!("  Added:  {}", stats.added_today);
            println!("  Errors: {}", stats.errors_today);
            println!("Last 24 hours:");
            println!("  Runs:   {}", stats.runs_last_24h);
            println!("  Added:  {}", stats.added_last_24h);
        }
    }

    Ok(())
}

/// Manage accounts
async fn cmd_accounts(config: &Config, command: AccountCommand) -> Result<()> {
    let state = StateManager::spawn(config.storage.db_path())?;

    match command {
        AccountCommand::Add { phone_number } => {
            let account = Account::new(phone_number);
            let id = state.create_account(account).await?;
            println!("Account registered: {}", id);
            println!("Activate it with: md accounts activate {}", id);
        }
        AccountCommand::List => {
            let accounts = state.list_accounts().await?;
            if accounts.is_empty() {
                println!("No accounts registered");
            } else {
                println!("{:<38} {:<16} {:<8}", "ID", "PHONE", "ACTIVE");
                println!("{}", "-".repeat(64));
                for account in accounts {
                    println!(
                        "{:<38} {:<16} {:<8}",
                        account.id,
                        account.phone_number,
                        if account.is_active { "yes" } else { "no" }
                    );
                }
            }
        }
        AccountCommand::Activate { id } => {
            state.activate_account(&id).await?;
            println!("Account activated: {}", id);
        }
        AccountCommand::Remove { id } => {
            state.delete_account(&id).await?;
            println!("Account removed: {}", id);
        }
    }

    Ok(())
}

/// Show logs
async fn cmd_logs(follow: bool, lines: usize) -> Result<()> {
    let log_path = get_log_path();

    if !log_path.exists() {
        println!("No log file found at: {}", log_path.display());
        println!("The daemon may not have been started yet.");
        return Ok(());
    }

    if follow {
        println!("Following log file: {} (Ctrl+C to stop)", log_path.display());
        println!();

        let mut child = std::process::Command::new("tail")
            .args(["-f", "-n", &lines.to_string()])
            .arg(&log_path)
            .spawn()
            .context("Failed to run tail -f")?;

        child.wait()?;
    } else {
        let file = fs::File::open(&log_path).context("Failed to open log file")?;
        let reader = BufReader::new(file);
        let all_lines: Vec<String> = reader.lines().map_while(Result::ok).collect();

        let start = all_lines.len().saturating_sub(lines);
        for line in &all_lines[start..] {
            println!("{}", line);
        }
    }

    Ok(())
}

/// Run as the daemon process (internal command)
async fn cmd_run_daemon(config: &Config) -> Result<()> {
    let daemon = DaemonManager::new();
    daemon.register_self()?;
    run_daemon(config).await
}

/// Run the daemon main loop
async fn run_daemon(config: &Config) -> Result<()> {
    info!("Daemon starting...");

    let data_dir = &config.storage.data_dir;
    fs::create_dir_all(data_dir).context(format!(
        "Cannot create data directory {}",
        data_dir.display()
    ))?;

    let state = StateManager::spawn(config.storage.db_path())
        .map_err(|e| eyre::eyre!("Failed to open job database: {}", e))?;
    info!("StateManager initialized");

    let store = MemberStore::open(data_dir).context("Failed to open member store")?;
    info!("MemberStore initialized");

    let client = create_client(&config.client).context("Failed to create protocol client")?;
    info!("Protocol client initialized ({})", config.client.provider);

    let manager = JobManager::new(
        state.clone(),
        store,
        client,
        config.retry.to_policy(),
        JobManagerConfig {
            max_concurrent_jobs: config.concurrency.max_jobs as usize,
            ..Default::default()
        },
    );
    info!("JobManager initialized");

    let (listener, socket_path) = ipc::create_listener()?;
    info!(?socket_path, "IPC socket listening");

    info!("Daemon running. Press Ctrl+C to stop.");

    use tokio::signal::unix::{SignalKind, signal};
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                warn!("SIGINT received");
                break;
            }
            _ = sigterm.recv() => {
                warn!("SIGTERM received");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((mut stream, _)) => {
                    if handle_connection(&mut stream, &manager, &state).await {
                        info!("Shutdown requested via IPC");
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "failed to accept IPC connection"),
            }
        }
    }

    info!("Daemon shutting down...");

    manager.shutdown().await;
    state.shutdown().await;
    ipc::cleanup_socket(&socket_path);

    info!("Daemon stopped");
    Ok(())
}

/// Serve one IPC connection. Returns true when the daemon should shut down.
async fn handle_connection(
    stream: &mut UnixStream,
    manager: &JobManager,
    state: &StateManager,
) -> bool {
    let msg = match ipc::read_message(stream).await {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "bad IPC message");
            return false;
        }
    };

    let (response, shutdown) = match msg {
        DaemonMessage::StartJob { spec } => match manager.start(spec).await {
            Ok(id) => (DaemonResponse::JobStarted { id }, false),
            Err(e) => (
                DaemonResponse::Error {
                    message: e.to_string(),
                },
                false,
            ),
        },
        DaemonMessage::StopJob { id } => match manager.request_stop(&id) {
            Ok(()) => (DaemonResponse::Ok, false),
            Err(e) => (
                DaemonResponse::Error {
                    message: e.to_string(),
                },
                false,
            ),
        },
        DaemonMessage::GetJob { id } => match state.get_job(&id).await {
            Ok(Some(job)) => (
                DaemonResponse::Job {
                    job: JobSummary {
                        id: job.id.clone(),
                        status: job.status.to_string(),
                        target_group: job.target_group.clone(),
                        added: job.added,
                        errors: job.errors,
                    },
                },
                false,
            ),
            Ok(None) => (
                DaemonResponse::Error {
                    message: format!("Job {} not found", id),
                },
                false,
            ),
            Err(e) => (
                DaemonResponse::Error {
                    message: e.to_string(),
                },
                false,
            ),
        },
        DaemonMessage::ListJobs => match state.list_jobs(None).await {
            Ok(jobs) => (
                DaemonResponse::Jobs {
                    jobs: jobs
                        .iter()
                        .map(|j| JobSummary {
                            id: j.id.clone(),
                            status: j.status.to_string(),
                            target_group: j.target_group.clone(),
                            added: j.added,
                            errors: j.errors,
                        })
                        .collect(),
                },
                false,
            ),
            Err(e) => (
                DaemonResponse::Error {
                    message: e.to_string(),
                },
                false,
            ),
        },
        DaemonMessage::Ping => (
            DaemonResponse::Pong {
                version: memberdaemon::daemon::VERSION.to_string(),
            },
            false,
        ),
        DaemonMessage::Shutdown => (DaemonResponse::Ok, true),
    };

    if let Err(e) = ipc::send_response(stream, response).await {
        warn!(error = %e, "failed to send IPC response");
    }

    shutdown
}
