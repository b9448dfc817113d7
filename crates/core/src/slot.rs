// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retention slots
//!
//! A slot is a named, persistent cursor into the log. Its `restart_seq`
//! pins every record after it; `confirmed_seq` is what the consumer has
//! durably acknowledged. At most one holder may stream from a slot at a
//! time.

use crate::error::ErrorKind;
use crate::seq::Seq;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest accepted slot name
pub const MAX_SLOT_NAME_LEN: usize = 63;

/// Identifier of the session holding a slot
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HolderId(pub String);

impl HolderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of consumer a slot serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    /// Raw log replay; restart may trail confirmed by a lag window
    Physical,
    /// Decoded change streaming
    Logical,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKind::Physical => f.write_str("physical"),
            SlotKind::Logical => f.write_str("logical"),
        }
    }
}

impl std::str::FromStr for SlotKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "physical" => Ok(SlotKind::Physical),
            "logical" => Ok(SlotKind::Logical),
            other => Err(format!("unknown slot kind: {}", other)),
        }
    }
}

/// Errors from slot operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    #[error("slot already exists: {0}")]
    DuplicateSlot(String),
    #[error("slot not found: {0}")]
    SlotNotFound(String),
    #[error("slot {slot} is held by {holder}")]
    SlotBusy { slot: String, holder: HolderId },
    #[error("slot {slot} cannot move backwards: {field} is {current}, requested {requested}")]
    NonMonotonicAdvance {
        slot: String,
        field: &'static str,
        current: Seq,
        requested: Seq,
    },
    #[error("slot {slot}: restart {restart} is ahead of confirmed {confirmed}")]
    RestartAheadOfConfirmed {
        slot: String,
        restart: Seq,
        confirmed: Seq,
    },
    #[error("invalid slot name {0:?}: use 1-63 lowercase letters, digits or underscores")]
    InvalidName(String),
}

impl SlotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SlotError::DuplicateSlot(_) => ErrorKind::DuplicateSlot,
            SlotError::SlotNotFound(_) => ErrorKind::SlotNotFound,
            SlotError::SlotBusy { .. } => ErrorKind::SlotBusy,
            SlotError::NonMonotonicAdvance { .. } => ErrorKind::NonMonotonicAdvance,
            SlotError::RestartAheadOfConfirmed { .. } | SlotError::InvalidName(_) => {
                ErrorKind::InvalidArgument
            }
        }
    }
}

/// Check a slot name against the accepted character set
pub fn validate_slot_name(name: &str) -> Result<(), SlotError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_SLOT_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SlotError::InvalidName(name.to_string()))
    }
}

/// A named cursor into the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionSlot {
    pub name: String,
    pub kind: SlotKind,
    pub restart_seq: Seq,
    pub confirmed_seq: Seq,
    /// Log position when the slot was created; the baseline is taken as of here
    #[serde(default)]
    pub created_seq: Seq,
    /// Session currently streaming from this slot; never persisted as held
    #[serde(skip)]
    pub holder: Option<HolderId>,
    pub created_at: DateTime<Utc>,
}

impl RetentionSlot {
    pub fn new(name: impl Into<String>, kind: SlotKind, created_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            kind,
            restart_seq: Seq::ZERO,
            confirmed_seq: Seq::ZERO,
            created_seq: Seq::ZERO,
            holder: None,
            created_at,
        }
    }

    /// Start both positions at `seq` instead of the beginning of the log
    pub fn starting_at(mut self, seq: Seq) -> Self {
        self.restart_seq = seq;
        self.confirmed_seq = seq;
        self.created_seq = seq;
        self
    }

    /// Move the restart point back to the first record of a transaction
    /// still open at the creation point; never past `confirmed_seq`
    pub fn restarting_at(mut self, seq: Seq) -> Self {
        self.restart_seq = seq.min(self.confirmed_seq);
        self
    }

    /// Nothing past the creation point has been acknowledged yet
    pub fn needs_initial_sync(&self) -> bool {
        self.confirmed_seq <= self.created_seq
    }

    /// First sequence a reader must see to resume this slot.
    ///
    /// When no transaction straddles the confirmed point the restart record
    /// itself is already processed.
    pub fn resume_seq(&self) -> Seq {
        if self.restart_seq == self.confirmed_seq {
            self.confirmed_seq.next()
        } else {
            self.restart_seq
        }
    }

    pub fn is_active(&self) -> bool {
        self.holder.is_some()
    }

    pub fn is_held_by(&self, holder: &HolderId) -> bool {
        self.holder.as_ref() == Some(holder)
    }

    /// Take the slot for `holder`; re-acquiring by the same holder succeeds
    pub fn acquire(&mut self, holder: &HolderId) -> Result<(), SlotError> {
        match &self.holder {
            Some(current) if current != holder => Err(SlotError::SlotBusy {
                slot: self.name.clone(),
                holder: current.clone(),
            }),
            _ => {
                self.holder = Some(holder.clone());
                Ok(())
            }
        }
    }

    /// Give the slot up; releasing a free slot is a no-op
    pub fn release(&mut self, holder: &HolderId) -> Result<(), SlotError> {
        match &self.holder {
            Some(current) if current != holder => Err(SlotError::SlotBusy {
                slot: self.name.clone(),
                holder: current.clone(),
            }),
            _ => {
                self.holder = None;
                Ok(())
            }
        }
    }

    /// The slot as it would be after moving to the given positions.
    ///
    /// Pure: the caller persists the result before making it visible.
    pub fn advanced(&self, restart: Seq, confirmed: Seq) -> Result<RetentionSlot, SlotError> {
        if restart < self.restart_seq {
            return Err(SlotError::NonMonotonicAdvance {
                slot: self.name.clone(),
                field: "restart",
                current: self.restart_seq,
                requested: restart,
            });
        }
        if confirmed < self.confirmed_seq {
            return Err(SlotError::NonMonotonicAdvance {
                slot: self.name.clone(),
                field: "confirmed",
                current: self.confirmed_seq,
                requested: confirmed,
            });
        }
        if restart > confirmed {
            return Err(SlotError::RestartAheadOfConfirmed {
                slot: self.name.clone(),
                restart,
                confirmed,
            });
        }
        let mut next = self.clone();
        next.restart_seq = restart;
        next.confirmed_seq = confirmed;
        Ok(next)
    }

    /// Records retained on behalf of this slot, given the newest sequence
    pub fn lag(&self, last_seq: Seq) -> u64 {
        last_seq.distance_from(self.restart_seq)
    }
}

#[cfg(test)]
#[path = "slot_tests.rs"]
mod tests;
