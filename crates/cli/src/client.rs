// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon client for CLI commands

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use thiserror::Error;
use tm_core::{
    ChangeBatch, CloseReason, ErrorKind, Publication, RetentionSlot, RowChange, Seq, SessionId,
    SlotKind, TxnId,
};
use tm_daemon::protocol::{self, ProtocolError};
use tm_daemon::{
    Config, LifecycleError, Request, Response, PROTOCOL_VERSION, STARTUP_MARKER_PREFIX,
};
use tm_engine::{MonitorSnapshot, SlotStatus};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::debug;

// Timeout configuration (env vars in milliseconds)
fn parse_duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Timeout for IPC requests
pub fn timeout_ipc() -> Duration {
    parse_duration_ms("TIDEMARK_TIMEOUT_IPC_MS").unwrap_or(Duration::from_secs(5))
}

/// Timeout for waiting for daemon to start
pub fn timeout_connect() -> Duration {
    parse_duration_ms("TIDEMARK_TIMEOUT_CONNECT_MS").unwrap_or(Duration::from_secs(5))
}

/// Timeout for waiting for process to exit
pub fn timeout_exit() -> Duration {
    parse_duration_ms("TIDEMARK_TIMEOUT_EXIT_MS").unwrap_or(Duration::from_secs(2))
}

/// Polling interval for retries
pub fn poll_interval() -> Duration {
    parse_duration_ms("TIDEMARK_POLL_INTERVAL_MS").unwrap_or(Duration::from_millis(50))
}

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Failed to start daemon: {0}")]
    DaemonStartFailed(String),

    #[error("Connection timeout waiting for daemon to start")]
    DaemonStartTimeout,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{kind}: {message}")]
    Rejected { kind: ErrorKind, message: String },

    #[error("Unexpected response from daemon")]
    UnexpectedResponse,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Lifecycle(#[from] LifecycleError),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Rejected { kind, .. } => *kind,
            ClientError::Protocol(e) => e.kind(),
            ClientError::Lifecycle(e) => e.kind(),
            ClientError::UnexpectedResponse => ErrorKind::Internal,
            ClientError::DaemonNotRunning
            | ClientError::DaemonStartFailed(_)
            | ClientError::DaemonStartTimeout
            | ClientError::Io(_) => ErrorKind::Io,
        }
    }
}

fn rejected(response: Response) -> ClientError {
    match response {
        Response::Error { kind, message } => ClientError::Rejected { kind, message },
        _ => ClientError::UnexpectedResponse,
    }
}

/// Daemon client
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    /// Connect to daemon, auto-starting if not running
    pub fn connect_or_start(data_dir: &Path) -> Result<Self, ClientError> {
        match Self::connect(data_dir) {
            Ok(client) => Ok(client),
            Err(ClientError::DaemonNotRunning) | Err(ClientError::Lifecycle(_)) => {
                std::fs::create_dir_all(data_dir)?;
                debug!(data_dir = %data_dir.display(), "daemon not running, starting it");
                // Start daemon in background
                let child = start_daemon_background(data_dir)?;
                // Wait for socket with retry, watching for early exit
                Self::connect_with_retry(data_dir, timeout_connect(), child)
            }
            Err(e) => Err(wrap_with_startup_error(e, data_dir)),
        }
    }

    /// Connect to existing daemon (no auto-start)
    pub fn connect(data_dir: &Path) -> Result<Self, ClientError> {
        let config = Config::for_data_dir(data_dir)?;

        if !config.socket_path.exists() {
            return Err(ClientError::DaemonNotRunning);
        }

        Ok(Self::at(config.socket_path))
    }

    /// Client for a known socket path
    pub fn at(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    fn connect_with_retry(
        data_dir: &Path,
        timeout: Duration,
        mut child: std::process::Child,
    ) -> Result<Self, ClientError> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            // Check if daemon process exited early (startup failure)
            if let Ok(Some(status)) = child.try_wait() {
                // Poll for startup error in log (filesystem may need to sync)
                let poll_start = Instant::now();
                while poll_start.elapsed() < timeout_exit() {
                    if let Some(err) = read_startup_error(data_dir) {
                        return Err(ClientError::DaemonStartFailed(err));
                    }
                    std::thread::sleep(poll_interval());
                }
                return Err(ClientError::DaemonStartFailed(format!(
                    "exited with {}",
                    status
                )));
            }

            match Self::connect(data_dir) {
                Ok(client) => return Ok(client),
                Err(ClientError::DaemonNotRunning) => {
                    std::thread::sleep(poll_interval());
                }
                Err(e) => return Err(wrap_with_startup_error(e, data_dir)),
            }
        }

        // Timeout - check log for startup errors
        Err(wrap_with_startup_error(
            ClientError::DaemonStartTimeout,
            data_dir,
        ))
    }

    /// Send a request and receive a response
    pub async fn send(&self, request: Request) -> Result<Response, ClientError> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (mut reader, mut writer) = stream.into_split();

        let data = protocol::encode(&request)?;
        tokio::time::timeout(timeout_ipc(), protocol::write_message(&mut writer, &data))
            .await
            .map_err(|_| ProtocolError::Timeout)??;

        let response_bytes =
            tokio::time::timeout(timeout_ipc(), protocol::read_message(&mut reader))
                .await
                .map_err(|_| ProtocolError::Timeout)??;

        Ok(protocol::decode(&response_bytes)?)
    }

    /// Check protocol compatibility
    pub async fn hello(&self) -> Result<String, ClientError> {
        let request = Request::Hello {
            version: PROTOCOL_VERSION.to_string(),
        };
        match self.send(request).await? {
            Response::Hello { version } => Ok(version),
            other => Err(rejected(other)),
        }
    }

    /// Daemon uptime and monitoring snapshot
    pub async fn status(&self) -> Result<(u64, MonitorSnapshot), ClientError> {
        match self.send(Request::Status).await? {
            Response::Status {
                uptime_secs,
                snapshot,
            } => Ok((uptime_secs, *snapshot)),
            other => Err(rejected(other)),
        }
    }

    pub async fn create_slot(
        &self,
        name: &str,
        kind: SlotKind,
    ) -> Result<RetentionSlot, ClientError> {
        let request = Request::CreateSlot {
            name: name.to_string(),
            kind,
        };
        match self.send(request).await? {
            Response::Slot { slot } => Ok(slot),
            other => Err(rejected(other)),
        }
    }

    pub async fn drop_slot(&self, name: &str) -> Result<RetentionSlot, ClientError> {
        let request = Request::DropSlot {
            name: name.to_string(),
        };
        match self.send(request).await? {
            Response::Slot { slot } => Ok(slot),
            other => Err(rejected(other)),
        }
    }

    pub async fn list_slots(&self) -> Result<Vec<SlotStatus>, ClientError> {
        match self.send(Request::ListSlots).await? {
            Response::Slots { slots } => Ok(slots),
            other => Err(rejected(other)),
        }
    }

    pub async fn create_publication(
        &self,
        publication: Publication,
    ) -> Result<Publication, ClientError> {
        match self.send(Request::CreatePublication { publication }).await? {
            Response::Publication { publication } => Ok(publication),
            other => Err(rejected(other)),
        }
    }

    pub async fn alter_publication(
        &self,
        publication: Publication,
    ) -> Result<Publication, ClientError> {
        match self.send(Request::AlterPublication { publication }).await? {
            Response::Publication { publication } => Ok(publication),
            other => Err(rejected(other)),
        }
    }

    pub async fn drop_publication(&self, name: &str) -> Result<(), ClientError> {
        let request = Request::DropPublication {
            name: name.to_string(),
        };
        match self.send(request).await? {
            Response::Ok => Ok(()),
            other => Err(rejected(other)),
        }
    }

    pub async fn list_publications(&self) -> Result<Vec<Publication>, ClientError> {
        match self.send(Request::ListPublications).await? {
            Response::Publications { publications } => Ok(publications),
            other => Err(rejected(other)),
        }
    }

    /// Append changes; returns the transaction id, last sequence written
    /// and whether the transaction was committed
    pub async fn append(
        &self,
        xid: Option<TxnId>,
        changes: Vec<RowChange>,
        commit: bool,
    ) -> Result<(TxnId, Seq, bool), ClientError> {
        let request = Request::Append {
            xid,
            changes,
            commit,
        };
        match self.send(request).await? {
            Response::Appended {
                xid,
                seq,
                committed,
            } => Ok((xid, seq, committed)),
            other => Err(rejected(other)),
        }
    }

    pub async fn abort(&self, xid: TxnId) -> Result<Seq, ClientError> {
        match self.send(Request::Abort { xid }).await? {
            Response::Aborted { seq, .. } => Ok(seq),
            other => Err(rejected(other)),
        }
    }

    /// Request daemon shutdown
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        match self.send(Request::Shutdown).await? {
            Response::Ok | Response::ShuttingDown => Ok(()),
            other => Err(rejected(other)),
        }
    }

    /// Open a subscription; the connection stays open for its lifetime
    pub async fn subscribe(
        &self,
        slot: &str,
        publication: &str,
    ) -> Result<Subscription, ClientError> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (mut reader, mut writer) = stream.into_split();
        let request = Request::Subscribe {
            slot: slot.to_string(),
            publication: publication.to_string(),
        };
        let data = protocol::encode(&request)?;
        tokio::time::timeout(timeout_ipc(), protocol::write_message(&mut writer, &data))
            .await
            .map_err(|_| ProtocolError::Timeout)??;

        let bytes = tokio::time::timeout(timeout_ipc(), protocol::read_message(&mut reader))
            .await
            .map_err(|_| ProtocolError::Timeout)??;
        match protocol::decode(&bytes)? {
            Response::Subscribed { session } => Ok(Subscription {
                session,
                reader,
                writer,
            }),
            other => Err(rejected(other)),
        }
    }
}

/// What a subscription yields
#[derive(Debug)]
pub enum Delivery {
    Batch(ChangeBatch),
    /// The daemon refused an ack; the stream continues
    Rejected { kind: ErrorKind, message: String },
    Closed(CloseReason),
}

/// Client side of a streaming session
pub struct Subscription {
    session: SessionId,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl Subscription {
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Wait for the next frame; there is no timeout since streams idle
    pub async fn next(&mut self) -> Result<Delivery, ClientError> {
        let bytes = protocol::read_message(&mut self.reader).await?;
        match protocol::decode(&bytes)? {
            Response::Changes { batch } => Ok(Delivery::Batch(batch)),
            Response::Closed { reason } => Ok(Delivery::Closed(reason)),
            Response::Error { kind, message } => Ok(Delivery::Rejected { kind, message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Acknowledge everything up to `seq`
    pub async fn ack(&mut self, seq: Seq) -> Result<(), ClientError> {
        let data = protocol::encode(&Request::Ack { seq })?;
        tokio::time::timeout(timeout_ipc(), protocol::write_message(&mut self.writer, &data))
            .await
            .map_err(|_| ProtocolError::Timeout)??;
        Ok(())
    }
}

/// Start the daemon in the background, returning the child process handle
fn start_daemon_background(data_dir: &Path) -> Result<std::process::Child, ClientError> {
    let tided_path = find_tided_binary();

    Command::new(&tided_path)
        .arg(data_dir)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map_err(|e| ClientError::DaemonStartFailed(e.to_string()))
}

/// Stop the daemon (graceful first, then forceful)
/// Returns true if daemon was stopped, false if it wasn't running
pub async fn daemon_stop(data_dir: &Path) -> Result<bool, ClientError> {
    let client = match DaemonClient::connect(data_dir) {
        Ok(c) => c,
        Err(ClientError::DaemonNotRunning) => return Ok(false),
        Err(ClientError::Lifecycle(LifecycleError::DataDirNotFound(..))) => return Ok(false),
        Err(e) => return Err(e),
    };

    // Try graceful shutdown (timeout handled by send())
    let shutdown_result = client.shutdown().await;

    if let Some(pid) = read_daemon_pid(data_dir) {
        if shutdown_result.is_ok() {
            // Graceful shutdown succeeded, wait for process to exit
            wait_for_exit(pid, timeout_exit()).await;
        }

        // Force kill if still running
        if process_exists(pid) {
            force_kill_daemon(pid);
            wait_for_exit(pid, timeout_exit()).await;
        }
    }

    Ok(true)
}

/// Wait for a process to exit
async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if !process_exists(pid) {
            return true;
        }
        tokio::time::sleep(poll_interval()).await;
    }
    false
}

/// Find the tided binary
fn find_tided_binary() -> PathBuf {
    // Explicit override (used by tests to ensure correct binary)
    if let Ok(path) = std::env::var("TIDEMARK_DAEMON_BINARY") {
        return PathBuf::from(path);
    }

    // Check current executable's directory
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join("tided");
            if sibling.exists() {
                return sibling;
            }
        }
    }

    // Fall back to PATH lookup
    PathBuf::from("tided")
}

/// Get the PID from the daemon PID file, if it exists
pub fn read_daemon_pid(data_dir: &Path) -> Option<u32> {
    let config = Config::for_data_dir(data_dir).ok()?;
    let content = std::fs::read_to_string(&config.lock_path).ok()?;
    content.trim().parse::<u32>().ok()
}

/// Check if a process with the given PID exists
pub fn process_exists(pid: u32) -> bool {
    // Use kill -0 to check if process exists without sending a signal
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Force kill a daemon process
pub fn force_kill_daemon(pid: u32) -> bool {
    Command::new("kill")
        .args(["-9", &pid.to_string()])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Read daemon log from the last startup marker, looking for errors.
/// Returns the error message if found, None otherwise.
pub fn read_startup_error(data_dir: &Path) -> Option<String> {
    let config = Config::for_data_dir(data_dir).ok()?;
    let content = std::fs::read_to_string(&config.log_path).ok()?;
    startup_error_in(&content)
}

fn startup_error_in(log: &str) -> Option<String> {
    // Find the last startup marker
    let start_pos = log.rfind(STARTUP_MARKER_PREFIX)?;
    let startup_log = &log[start_pos..];

    // Look for ERROR lines
    let errors: Vec<&str> = startup_log
        .lines()
        .filter(|line| line.contains(" ERROR ") || line.contains("Failed to start"))
        .collect();

    if errors.is_empty() {
        return None;
    }

    // Extract just the error messages (strip timestamp/level prefix)
    let error_messages: Vec<String> = errors
        .iter()
        .filter_map(|line| line.split_once(": ").map(|(_, msg)| msg.to_string()))
        .collect();

    if error_messages.is_empty() {
        Some(errors.join("\n"))
    } else {
        Some(error_messages.join("\n"))
    }
}

/// Wrap an error with startup log info if available.
fn wrap_with_startup_error(err: ClientError, data_dir: &Path) -> ClientError {
    // Don't double-wrap
    if matches!(err, ClientError::DaemonStartFailed(_)) {
        return err;
    }

    match read_startup_error(data_dir) {
        Some(startup_error) => ClientError::DaemonStartFailed(startup_error),
        None => err,
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
