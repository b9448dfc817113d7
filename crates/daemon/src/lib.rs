// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! tm-daemon: the `tided` process
//!
//! Owns one data directory: opens the log, slot registry and publication
//! catalog, runs maintenance, and serves the operator protocol on a Unix
//! socket. The wire types are shared with the `tide` CLI.

pub mod config;
pub mod lifecycle;
pub mod protocol;
pub mod server;

pub use config::{ConfigError, Settings};
pub use lifecycle::{resolve_data_dir, Config, DaemonRuntime, LifecycleError};
pub use protocol::{ProtocolError, Request, Response, PROTOCOL_VERSION};

/// Startup marker prefix written to the log before anything else.
/// The CLI uses it to find where the current startup attempt begins.
/// Full format: "--- tided: starting (pid: 12345) ---"
pub const STARTUP_MARKER_PREFIX: &str = "--- tided: starting (pid: ";
