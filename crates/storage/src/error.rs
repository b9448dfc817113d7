// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage errors

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tm_core::{ErrorKind, Seq, SlotError};

/// Errors that can occur in log, slot and catalog storage
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupted record in segment {segment} at line {line}: {reason}")]
    Corrupted {
        segment: u64,
        line: u64,
        reason: String,
    },
    #[error("log gap: expected seq {expected}, found {found}")]
    Gap { expected: Seq, found: Seq },
    #[error("segment file missing: {}", path.display())]
    MissingSegment { segment: u64, path: PathBuf },
    #[error("seq {requested} has been reclaimed (oldest retained is {oldest})")]
    Reclaimed { requested: Seq, oldest: Seq },
    #[error("segment {segment} ({min_seq}..={max_seq}) is pinned by a reader at {pinned_at}")]
    SegmentInUse {
        segment: u64,
        min_seq: Seq,
        max_seq: Seq,
        pinned_at: Seq,
    },
    #[error(transparent)]
    Slot(#[from] SlotError),
    #[error("publication already exists: {0}")]
    DuplicatePublication(String),
    #[error("publication not found: {0}")]
    PublicationNotFound(String),
    #[error("invalid publication {name:?}: {reason}")]
    InvalidPublication { name: String, reason: String },
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Io(_) => ErrorKind::Io,
            StorageError::Json(_)
            | StorageError::Corrupted { .. }
            | StorageError::Gap { .. }
            | StorageError::MissingSegment { .. } => ErrorKind::Corrupted,
            StorageError::Reclaimed { .. } => ErrorKind::SlotTooFarBehind,
            StorageError::SegmentInUse { .. } => ErrorKind::SegmentInUse,
            StorageError::Slot(e) => e.kind(),
            StorageError::DuplicatePublication(_) => ErrorKind::DuplicatePublication,
            StorageError::PublicationNotFound(_) => ErrorKind::PublicationNotFound,
            StorageError::InvalidPublication { .. } => ErrorKind::InvalidArgument,
        }
    }
}
