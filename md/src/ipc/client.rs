//! IPC client for communicating with the daemon
//!
//! Thin interface the CLI uses to drive job control over the Unix Domain
//! Socket.

use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use crate::domain::JobSpec;

use super::get_socket_path;
use super::messages::{DaemonMessage, DaemonResponse, JobSummary};

/// Default timeout for IPC operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum message size
const MAX_MESSAGE_SIZE: usize = 4096;

/// Client for communicating with the daemon via IPC
#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Default for DaemonClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonClient {
    /// Create a new client with the default socket path
    pub fn new() -> Self {
        Self {
            socket_path: get_socket_path(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create a client with a custom socket path (for testing)
    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set a custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check if the daemon socket exists
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Start a job; returns the new job id
    pub async fn start_job(&self, spec: JobSpec) -> Result<String> {
        debug!(target_group = %spec.target_group, "DaemonClient: starting job");
        let response = self.send_message(DaemonMessage::StartJob { spec }).await?;
        match response {
            DaemonResponse::JobStarted { id } => Ok(id),
            DaemonResponse::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected response")),
        }
    }

    /// Request a running job to stop
    pub async fn stop_job(&self, id: &str) -> Result<()> {
        debug!(%id, "DaemonClient: stopping job");
        let response = self
            .send_message(DaemonMessage::StopJob { id: id.to_string() })
            .await?;
        match response {
            DaemonResponse::Ok => Ok(()),
            DaemonResponse::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected response")),
        }
    }

    /// Fetch one job's status and counters
    pub async fn get_job(&self, id: &str) -> Result<JobSummary> {
        debug!(%id, "DaemonClient: fetching job");
        let response = self
            .send_message(DaemonMessage::GetJob { id: id.to_string() })
            .await?;
        match response {
            DaemonResponse::Job { job } => Ok(job),
            DaemonResponse::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected response")),
        }
    }

    /// List job records
    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        debug!("DaemonClient: listing jobs");
        let response = self.send_message(DaemonMessage::ListJobs).await?;
        match response {
            DaemonResponse::Jobs { jobs } => Ok(jobs),
            DaemonResponse::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected response")),
        }
    }

    /// Check if daemon is alive and get its version
    pub async fn ping(&self) -> Result<String> {
        debug!("DaemonClient: pinging daemon");
        let response = self.send_message(DaemonMessage::Ping).await?;
        match response {
            DaemonResponse::Pong { version } => Ok(version),
            DaemonResponse::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected response")),
        }
    }

    /// Request daemon to shutdown gracefully
    pub async fn shutdown(&self) -> Result<()> {
        debug!("DaemonClient: requesting daemon shutdown");
        let response = self.send_message(DaemonMessage::Shutdown).await?;
        match response {
            DaemonResponse::Ok => Ok(()),
            DaemonResponse::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected response")),
        }
    }

    /// Send a message to the daemon and wait for response
    async fn send_message(&self, msg: DaemonMessage) -> Result<DaemonResponse> {
        debug!(?self.socket_path, ?msg, "DaemonClient: sending message");

        let mut stream = tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to daemon socket")?;

        let msg_json = serde_json::to_string(&msg).context("Failed to serialize message")?;
        if msg_json.len() > MAX_MESSAGE_SIZE {
            return Err(eyre::eyre!("Message too large: {} bytes", msg_json.len()));
        }

        tokio::time::timeout(self.timeout, async {
            stream
                .write_all(msg_json.as_bytes())
                .await
                .context("Failed to write message")?;
            stream.write_all(b"\n").await.context("Failed to write newline")?;
            stream.flush().await.context("Failed to flush stream")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")??;

        let mut reader = BufReader::new(&mut stream);
        let mut response_line = String::new();

        tokio::time::timeout(self.timeout, async {
            let bytes_read = reader
                .read_line(&mut response_line)
                .await
                .context("Failed to read response")?;

            if bytes_read > MAX_MESSAGE_SIZE {
                return Err(eyre::eyre!("Response too large: {} bytes", bytes_read));
            }

            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Read timeout")??;

        let response: DaemonResponse =
            serde_json::from_str(response_line.trim()).context("Failed to parse daemon response")?;

        debug!(?response, "DaemonClient: received response");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_client_default() {
        let client = DaemonClient::default();
        assert!(client.socket_path.ends_with("daemon.sock"));
    }

    #[test]
    fn test_client_with_custom_path() {
        let path = PathBuf::from("/custom/path/daemon.sock");
        let client = DaemonClient::with_socket_path(path.clone());
        assert_eq!(client.socket_path, path);
    }

    #[test]
    fn test_client_with_timeout() {
        let client = DaemonClient::new().with_timeout(Duration::from_secs(10));
        assert_eq!(client.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_socket_exists_false() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.sock");
        let client = DaemonClient::with_socket_path(path);
        assert!(!client.socket_exists());
    }
}
