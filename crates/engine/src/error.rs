// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the engine runtime

use crate::decoder::DecodeError;
use crate::maintenance::MaintenanceError;
use crate::session::SessionError;
use thiserror::Error;
use tm_core::{ErrorKind, SessionId};
use tm_storage::StorageError;

/// Errors surfaced by runtime operations
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Maintenance(#[from] MaintenanceError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::Storage(e) => e.kind(),
            RuntimeError::Session(e) => e.kind(),
            RuntimeError::Maintenance(e) => e.kind(),
            RuntimeError::Decode(e) => e.kind(),
            RuntimeError::SessionNotFound(_) => ErrorKind::SessionNotFound,
            RuntimeError::Encode(_) => ErrorKind::Internal,
            RuntimeError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }
}
