// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Logical decoding of log records
//!
//! Data records are buffered per transaction and only released as one
//! batch when that transaction's commit record is read; an abort record
//! drops the buffer. Publication filtering happens as records are read so
//! unpublished changes are never buffered.

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tm_core::{
    BatchKind, ChangeBatch, ChangeOp, DecodedChange, ErrorKind, LogRecord, Publication,
    RecordKind, Row, RowChange, Seq, TxnId, TxnMarker,
};

/// Default byte bound for one transaction, below the 16 MiB wire frame
pub const DEFAULT_MAX_TXN_BYTES: usize = 12 * 1024 * 1024;

/// Bytes a decoded change adds over its stored payload once encoded
const CHANGE_OVERHEAD: usize = 96;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Most published changes one transaction may buffer
    pub max_txn_changes: usize,
    /// Most bytes one transaction's batch may occupy once encoded
    pub max_txn_bytes: usize,
    /// Drop changes tagged with this origin
    pub skip_origin: Option<String>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_txn_changes: 100_000,
            max_txn_bytes: DEFAULT_MAX_TXN_BYTES,
            skip_origin: None,
        }
    }
}

impl DecoderConfig {
    pub fn with_max_txn_changes(mut self, max: usize) -> Self {
        self.max_txn_changes = max;
        self
    }

    pub fn with_max_txn_bytes(mut self, max: usize) -> Self {
        self.max_txn_bytes = max;
        self
    }

    pub fn with_skip_origin(mut self, origin: impl Into<String>) -> Self {
        self.skip_origin = Some(origin.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed {kind} record at seq {seq}: {reason}")]
    Corruption {
        seq: Seq,
        kind: RecordKind,
        reason: String,
    },
    #[error("{op} on {entity} at seq {seq} has no before image")]
    MissingIdentity {
        seq: Seq,
        entity: String,
        op: ChangeOp,
    },
    #[error("transaction {xid} exceeds {limit} buffered changes")]
    TransactionTooLarge { xid: TxnId, limit: usize },
    #[error("transaction {xid} exceeds {limit} buffered bytes")]
    TransactionTooManyBytes { xid: TxnId, limit: usize },
}

impl DecodeError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::DecodeCorruption
    }
}

/// A published change waiting for its transaction to finish
#[derive(Debug)]
struct PendingChange {
    entity: String,
    op: ChangeOp,
    before: Option<Row>,
    after: Option<Row>,
    origin: Option<String>,
}

#[derive(Debug)]
struct TxnBuffer {
    /// First record of the transaction seen by this decoder
    first_seq: Seq,
    changes: Vec<PendingChange>,
    /// Estimated encoded size of `changes`
    bytes: usize,
}

/// Stateful decoder for one publication
pub struct Decoder {
    publication: Arc<Publication>,
    config: DecoderConfig,
    open: BTreeMap<TxnId, TxnBuffer>,
}

impl Decoder {
    pub fn new(publication: Arc<Publication>, config: DecoderConfig) -> Self {
        Self {
            publication,
            config,
            open: BTreeMap::new(),
        }
    }

    pub fn publication(&self) -> &Publication {
        &self.publication
    }

    /// Transactions with buffered state
    pub fn open_transactions(&self) -> usize {
        self.open.len()
    }

    pub fn buffered_changes(&self) -> usize {
        self.open.values().map(|t| t.changes.len()).sum()
    }

    /// Forget all in-flight transactions
    pub fn reset(&mut self) {
        self.open.clear();
    }

    /// Feed one record; a commit yields the transaction's batch.
    ///
    /// Every commit yields a batch, even when nothing in the transaction
    /// was published, so consumers can acknowledge progress.
    pub fn decode(&mut self, record: &LogRecord) -> Result<Option<ChangeBatch>, DecodeError> {
        match record.kind {
            RecordKind::Data => {
                self.decode_data(record)?;
                Ok(None)
            }
            RecordKind::Commit => {
                let xid = self.marker(record)?;
                let buffer = self.open.remove(&xid);
                Ok(Some(self.finish(xid, record.seq, buffer)))
            }
            RecordKind::Abort => {
                let xid = self.marker(record)?;
                if let Some(buffer) = self.open.remove(&xid) {
                    tracing::debug!(
                        %xid,
                        discarded = buffer.changes.len(),
                        "transaction aborted"
                    );
                }
                Ok(None)
            }
            RecordKind::Checkpoint => Ok(None),
        }
    }

    fn decode_data(&mut self, record: &LogRecord) -> Result<(), DecodeError> {
        let change = RowChange::decode(&record.payload).map_err(|e| corruption(record, e))?;
        if change.op.requires_identity() && change.before.is_none() {
            return Err(DecodeError::MissingIdentity {
                seq: record.seq,
                entity: change.entity,
                op: change.op,
            });
        }

        let buffer = self.open.entry(change.xid).or_insert_with(|| TxnBuffer {
            first_seq: record.seq,
            changes: Vec::new(),
            bytes: 0,
        });

        let skipped_origin = change.origin.is_some()
            && change.origin.as_deref() == self.config.skip_origin.as_deref();
        if skipped_origin || !self.publication.publishes(&change.entity, change.op) {
            return Ok(());
        }

        if buffer.changes.len() >= self.config.max_txn_changes {
            return Err(DecodeError::TransactionTooLarge {
                xid: change.xid,
                limit: self.config.max_txn_changes,
            });
        }
        let bytes = buffer.bytes + record.payload.len() + CHANGE_OVERHEAD;
        if bytes > self.config.max_txn_bytes {
            return Err(DecodeError::TransactionTooManyBytes {
                xid: change.xid,
                limit: self.config.max_txn_bytes,
            });
        }
        buffer.bytes = bytes;
        buffer.changes.push(PendingChange {
            entity: change.entity,
            op: change.op,
            before: change.before,
            after: change.after,
            origin: change.origin,
        });
        Ok(())
    }

    fn marker(&self, record: &LogRecord) -> Result<TxnId, DecodeError> {
        marker_xid(record)
    }

    fn finish(&self, xid: TxnId, commit_seq: Seq, buffer: Option<TxnBuffer>) -> ChangeBatch {
        let restart_floor = self
            .open
            .values()
            .map(|t| t.first_seq)
            .min()
            .map_or(commit_seq, |first| first.min(commit_seq));
        let changes = buffer
            .map(|b| b.changes)
            .unwrap_or_default()
            .into_iter()
            .map(|c| DecodedChange {
                entity: c.entity,
                operation: c.op,
                before_image: c.before,
                after_image: c.after,
                commit_seq,
                transaction_id: xid,
                origin: c.origin,
            })
            .collect();
        ChangeBatch {
            kind: BatchKind::Transaction,
            xid,
            commit_seq,
            restart_floor,
            changes,
        }
    }
}

/// Tracks which transactions are still open while scanning the log,
/// without buffering their changes
#[derive(Debug, Default)]
pub struct OpenTransactions {
    first_seq: BTreeMap<TxnId, Seq>,
}

impl OpenTransactions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, record: &LogRecord) -> Result<(), DecodeError> {
        match record.kind {
            RecordKind::Data => {
                let change =
                    RowChange::decode(&record.payload).map_err(|e| corruption(record, e))?;
                self.first_seq.entry(change.xid).or_insert(record.seq);
            }
            RecordKind::Commit | RecordKind::Abort => {
                self.first_seq.remove(&marker_xid(record)?);
            }
            RecordKind::Checkpoint => {}
        }
        Ok(())
    }

    /// First record of the oldest transaction still open
    pub fn earliest(&self) -> Option<Seq> {
        self.first_seq.values().min().copied()
    }

    pub fn len(&self) -> usize {
        self.first_seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_seq.is_empty()
    }
}

fn marker_xid(record: &LogRecord) -> Result<TxnId, DecodeError> {
    TxnMarker::decode(&record.payload)
        .map(|m| m.xid)
        .map_err(|e| corruption(record, e))
}

fn corruption(record: &LogRecord, err: serde_json::Error) -> DecodeError {
    DecodeError::Corruption {
        seq: record.seq,
        kind: record.kind,
        reason: err.to_string(),
    }
}

#[cfg(test)]
#[path = "decoder_tests.rs"]
mod tests;
