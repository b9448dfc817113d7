// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Logical change events
//!
//! Producers write [`RowChange`] payloads into DATA records and a
//! [`TxnMarker`] into COMMIT/ABORT records. The decoder turns committed
//! transactions into [`ChangeBatch`]es of [`DecodedChange`]s.

use crate::seq::Seq;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Column name to value
pub type Row = BTreeMap<String, serde_json::Value>;

/// Transaction identifier assigned by the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxnId(pub u64);

impl TxnId {
    /// Reserved for baseline batches produced during catch-up
    pub const SNAPSHOT: TxnId = TxnId(0);
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operation kinds a publication can expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
    Truncate,
}

impl ChangeOp {
    pub const ALL: [ChangeOp; 4] = [
        ChangeOp::Insert,
        ChangeOp::Update,
        ChangeOp::Delete,
        ChangeOp::Truncate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeOp::Insert => "insert",
            ChangeOp::Update => "update",
            ChangeOp::Delete => "delete",
            ChangeOp::Truncate => "truncate",
        }
    }

    /// Whether the before image is needed to identify the changed row
    pub fn requires_identity(self) -> bool {
        matches!(self, ChangeOp::Update | ChangeOp::Delete)
    }
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChangeOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" => Ok(ChangeOp::Insert),
            "update" => Ok(ChangeOp::Update),
            "delete" => Ok(ChangeOp::Delete),
            "truncate" => Ok(ChangeOp::Truncate),
            other => Err(format!("unknown operation: {}", other)),
        }
    }
}

/// Payload of a DATA record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    pub xid: TxnId,
    pub entity: String,
    pub op: ChangeOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Row>,
    /// Node the change originated on, if it was itself replicated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl RowChange {
    pub fn insert(xid: TxnId, entity: impl Into<String>, after: Row) -> Self {
        Self {
            xid,
            entity: entity.into(),
            op: ChangeOp::Insert,
            before: None,
            after: Some(after),
            origin: None,
        }
    }

    pub fn update(xid: TxnId, entity: impl Into<String>, before: Row, after: Row) -> Self {
        Self {
            xid,
            entity: entity.into(),
            op: ChangeOp::Update,
            before: Some(before),
            after: Some(after),
            origin: None,
        }
    }

    pub fn delete(xid: TxnId, entity: impl Into<String>, before: Row) -> Self {
        Self {
            xid,
            entity: entity.into(),
            op: ChangeOp::Delete,
            before: Some(before),
            after: None,
            origin: None,
        }
    }

    pub fn truncate(xid: TxnId, entity: impl Into<String>) -> Self {
        Self {
            xid,
            entity: entity.into(),
            op: ChangeOp::Truncate,
            before: None,
            after: None,
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Payload of a COMMIT or ABORT record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnMarker {
    pub xid: TxnId,
}

impl TxnMarker {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// A consumer-visible change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedChange {
    pub entity: String,
    pub operation: ChangeOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_image: Option<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_image: Option<Row>,
    pub commit_seq: Seq,
    pub transaction_id: TxnId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// Where a batch came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    /// Initial full-data transfer during catch-up
    Snapshot,
    /// One committed transaction
    Transaction,
}

/// A contiguous, ordered group of changes terminated by a transaction
/// boundary at `commit_seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub kind: BatchKind,
    pub xid: TxnId,
    pub commit_seq: Seq,
    /// Oldest position still needed to re-decode anything after this batch
    pub restart_floor: Seq,
    pub changes: Vec<DecodedChange>,
}

impl ChangeBatch {
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[cfg(test)]
#[path = "change_tests.rs"]
mod tests;
