// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log records as stored by the log store

use crate::seq::Seq;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a log record represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// A row change belonging to an open transaction
    Data,
    /// End of a transaction; its buffered changes become visible
    Commit,
    /// Rollback marker; the transaction's changes are discarded
    Abort,
    /// Storage checkpoint; carries no logical changes
    Checkpoint,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::Data => "data",
            RecordKind::Commit => "commit",
            RecordKind::Abort => "abort",
            RecordKind::Checkpoint => "checkpoint",
        };
        f.write_str(name)
    }
}

/// An immutable, sequenced record in the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub seq: Seq,
    pub kind: RecordKind,
    pub payload: Vec<u8>,
}

impl LogRecord {
    pub fn new(seq: Seq, kind: RecordKind, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            seq,
            kind,
            payload: payload.into(),
        }
    }

    /// Size used for retention accounting
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}
