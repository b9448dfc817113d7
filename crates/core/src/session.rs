// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming session state machine
//!
//! ```text
//! INIT ──► CATCHUP ──► STREAMING ◄──► PAUSED
//!   │         │            │            │
//!   └─────────┴────────────┴────────────┴──► CLOSED
//! ```
//!
//! INIT may go straight to STREAMING when no baseline transfer is needed.

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a streaming session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a session reached CLOSED
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CloseReason {
    /// Explicit stop or cancellation
    Stopped,
    /// The consumer hung up
    ConsumerGone,
    /// Unrecoverable error; needs operator action
    Failed { kind: ErrorKind, message: String },
}

/// Session lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Init,
    Catchup,
    Streaming,
    Paused,
    Closed { reason: CloseReason },
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Init => "init",
            SessionState::Catchup => "catchup",
            SessionState::Streaming => "streaming",
            SessionState::Paused => "paused",
            SessionState::Closed { .. } => "closed",
        }
    }

    /// Whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Closed { .. }, _) => false,
            (_, Closed { .. }) => true,
            (Init, Catchup) | (Init, Streaming) => true,
            (Catchup, Streaming) => true,
            (Streaming, Paused) | (Paused, Streaming) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
