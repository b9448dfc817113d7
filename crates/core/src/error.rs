// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stable error taxonomy shared by every layer
//!
//! Component errors carry details; `ErrorKind` is what operators and client
//! code match on. Its `as_str()` names are part of the wire protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DuplicateSlot,
    SlotNotFound,
    SlotBusy,
    NonMonotonicAdvance,
    SlotTooFarBehind,
    SegmentInUse,
    DecodeCorruption,
    ConsumerBackpressure,
    ChannelIo,
    DuplicatePublication,
    PublicationNotFound,
    SessionNotFound,
    InvalidArgument,
    Corrupted,
    Io,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::DuplicateSlot => "duplicate_slot",
            ErrorKind::SlotNotFound => "slot_not_found",
            ErrorKind::SlotBusy => "slot_busy",
            ErrorKind::NonMonotonicAdvance => "non_monotonic_advance",
            ErrorKind::SlotTooFarBehind => "slot_too_far_behind",
            ErrorKind::SegmentInUse => "segment_in_use",
            ErrorKind::DecodeCorruption => "decode_corruption",
            ErrorKind::ConsumerBackpressure => "consumer_backpressure",
            ErrorKind::ChannelIo => "channel_io",
            ErrorKind::DuplicatePublication => "duplicate_publication",
            ErrorKind::PublicationNotFound => "publication_not_found",
            ErrorKind::SessionNotFound => "session_not_found",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Corrupted => "corrupted",
            ErrorKind::Io => "io",
            ErrorKind::Internal => "internal",
        }
    }

    /// Worth retrying later without operator action
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::SlotBusy
                | ErrorKind::SegmentInUse
                | ErrorKind::ConsumerBackpressure
                | ErrorKind::ChannelIo
        )
    }

    /// Requires remedial action (re-sync, repair); never retried
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::SlotTooFarBehind | ErrorKind::DecodeCorruption | ErrorKind::Corrupted
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
