// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: paths, startup, shutdown.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tm_adapters::{NoOpBaseline, NoOpScanner};
use tm_core::{ErrorKind, Seq, SystemClock, UuidIdGen};
use tm_engine::{MaintenanceHandle, Runtime, RuntimeDeps, RuntimeError};
use tm_storage::{LogStore, PublicationCatalog, SlotRegistry, StorageError};
use tokio::net::UnixListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{ConfigError, Settings};
use crate::server::ServerContext;

/// Runtime with the adapters the daemon ships with
pub type DaemonRuntime = Runtime<NoOpScanner, NoOpBaseline, SystemClock, UuidIdGen>;

/// Daemon paths, all derived from the data directory
#[derive(Debug, Clone)]
pub struct Config {
    /// Canonical data directory
    pub data_dir: PathBuf,
    /// Path to Unix socket
    pub socket_path: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to version file
    pub version_path: PathBuf,
    /// Path to daemon log file
    pub log_path: PathBuf,
    /// Directory holding log segments and the segment index
    pub store_path: PathBuf,
}

impl Config {
    /// Create config for an existing data directory
    pub fn for_data_dir(data_dir: &Path) -> Result<Self, LifecycleError> {
        let canonical = data_dir
            .canonicalize()
            .map_err(|e| LifecycleError::DataDirNotFound(data_dir.to_path_buf(), e))?;

        let hash = data_dir_hash(&canonical);
        let socket_dir = socket_dir();

        Ok(Self {
            socket_path: socket_dir.join(format!("{}.sock", hash)),
            lock_path: canonical.join("tided.pid"),
            version_path: canonical.join("tided.version"),
            log_path: canonical.join("tided.log"),
            store_path: canonical.join("log"),
            data_dir: canonical,
        })
    }
}

/// Daemon state during operation
pub struct DaemonState {
    /// Configuration
    pub config: Config,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    /// Unix socket listener
    pub listener: UnixListener,
    /// Shared with every connection task
    pub ctx: Arc<ServerContext>,
    /// Fires when a client asks the daemon to stop
    pub shutdown_requested: watch::Receiver<bool>,
    maintenance: Option<MaintenanceHandle>,
}

impl DaemonState {
    /// Shutdown the daemon gracefully
    pub async fn shutdown(&mut self) -> Result<(), LifecycleError> {
        info!("Shutting down daemon...");

        // 1. Stop sessions; each releases its slot
        let stopped = self.ctx.runtime.stop_sessions().await;
        info!(sessions = stopped, "sessions stopped");

        // 2. Let the current maintenance pass finish
        if let Some(maintenance) = self.maintenance.take() {
            maintenance.stop().await;
        }

        // 3. Flush the slot registry and sync the log
        self.ctx.runtime.shutdown().await?;

        // 4. Remove socket, PID and version files
        for path in [
            &self.config.socket_path,
            &self.config.lock_path,
            &self.config.version_path,
        ] {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }

        // 5. Lock file is released automatically when self.lock_file is dropped

        info!("Daemon shutdown complete");
        Ok(())
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Data directory not found at {0}: {1}")]
    DataDirNotFound(PathBuf, std::io::Error),

    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::Config(_) => ErrorKind::InvalidArgument,
            LifecycleError::Storage(e) => e.kind(),
            LifecycleError::Runtime(e) => e.kind(),
            LifecycleError::DataDirNotFound(..)
            | LifecycleError::NoStateDir
            | LifecycleError::LockFailed(_)
            | LifecycleError::BindFailed(..)
            | LifecycleError::Io(_) => ErrorKind::Io,
        }
    }
}

/// Start the daemon
pub async fn startup(config: &Config) -> Result<DaemonState, LifecycleError> {
    match startup_inner(config).await {
        Ok(state) => Ok(state),
        Err(e) => {
            // Clean up any resources created before failure
            if !matches!(e, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(config);
            }
            Err(e)
        }
    }
}

/// Inner startup logic - cleanup_on_failure called if this fails
async fn startup_inner(config: &Config) -> Result<DaemonState, LifecycleError> {
    // 1. Create socket directory
    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // 2. Acquire lock file FIRST - prevents races. Truncate only once the
    //    lock is ours so a running daemon's PID survives a failed start.
    let mut lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    std::fs::write(&config.version_path, env!("CARGO_PKG_VERSION"))?;

    // 3. Load settings BEFORE binding socket (fail fast on a bad file)
    let settings = Settings::load(&config.data_dir)?;

    // 4. Open durable state; recovery happens here
    let store = LogStore::open(&config.store_path, settings.store_config())?;
    let registry = SlotRegistry::open(&config.data_dir)?;
    let publications = PublicationCatalog::open(&config.data_dir)?;

    let stats = store.stats();
    info!(
        oldest_seq = %stats.oldest_seq,
        last_seq = %stats.last_seq,
        segments = stats.segments,
        slots = registry.list().len(),
        publications = publications.list().len(),
        "loaded state"
    );
    let stale: Vec<_> = registry
        .list()
        .into_iter()
        .filter(|s| s.resume_seq().max(Seq(1)) < stats.oldest_seq)
        .collect();
    for slot in &stale {
        warn!(
            slot = %slot.name,
            restart_seq = %slot.restart_seq,
            "slot points below the oldest retained record and must be recreated"
        );
    }

    // 5. Remove stale socket and bind (LAST - only after all validation passes)
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let listener = UnixListener::bind(&config.socket_path)
        .map_err(|e| LifecycleError::BindFailed(config.socket_path.clone(), e))?;

    // 6. Create runtime and start maintenance
    let runtime = Runtime::new(
        RuntimeDeps {
            store: Arc::new(store),
            registry: Arc::new(registry),
            publications: Arc::new(publications),
            scanner: NoOpScanner,
            baseline: NoOpBaseline,
        },
        settings.runtime_config(),
        SystemClock,
        UuidIdGen,
    );
    let maintenance = runtime.spawn_maintenance();
    let (ctx, shutdown_requested) = ServerContext::new(runtime);

    info!("Daemon started for data dir: {}", config.data_dir.display());

    Ok(DaemonState {
        config: config.clone(),
        lock_file,
        listener,
        ctx: Arc::new(ctx),
        shutdown_requested,
        maintenance: Some(maintenance),
    })
}

/// Clean up resources on startup failure
fn cleanup_on_failure(config: &Config) {
    for path in [
        &config.socket_path,
        &config.version_path,
        &config.lock_path,
    ] {
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Resolve the data directory: explicit argument, `TIDEMARK_DATA_DIR`,
/// then the XDG state directory
pub fn resolve_data_dir(arg: Option<PathBuf>) -> Result<PathBuf, LifecycleError> {
    if let Some(dir) = arg {
        return Ok(dir);
    }
    if let Ok(dir) = std::env::var("TIDEMARK_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let state = dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/state")))
        .ok_or(LifecycleError::NoStateDir)?;
    Ok(state.join("tidemark"))
}

/// Get the socket directory
///
/// Uses /tmp/tidemark by default to keep paths short (macOS SUN_LEN = 104).
/// Can be overridden with TIDEMARK_SOCKET_DIR for testing.
fn socket_dir() -> PathBuf {
    match std::env::var("TIDEMARK_SOCKET_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => PathBuf::from("/tmp/tidemark"),
    }
}

/// First 16 hex chars of the SHA-256 of the canonical data dir
fn data_dir_hash(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    let result = hasher.finalize();
    result[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
