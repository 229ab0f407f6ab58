//! Inter-Process Communication for job control
//!
//! Unix Domain Socket IPC between the CLI and the daemon. The CLI starts and
//! stops jobs and polls progress through single-line JSON messages; the
//! daemon performs no pipeline work on this surface.

use std::path::PathBuf;

pub mod client;
pub mod listener;
pub mod messages;

pub use client::DaemonClient;
pub use listener::{cleanup_socket, create_listener, create_listener_at, read_message, send_response};
pub use messages::{DaemonMessage, DaemonResponse, JobSummary};

/// Get the socket path for daemon IPC
///
/// Uses the same base directory as other daemon files (PID file, version file).
pub fn get_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("memberdaemon")
        .join("daemon.sock")
}
