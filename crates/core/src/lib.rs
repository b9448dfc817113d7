// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! tm-core: domain types for the tidemark retention and streaming service
//!
//! This crate provides:
//! - Log positions (`Seq`) and the global retention `Watermark`
//! - Log records and the logical change model producers and consumers share
//! - Publications, retention slots and the streaming session state machine
//! - The stable `ErrorKind` taxonomy
//! - Clock and id abstractions for deterministic tests

pub mod change;
pub mod clock;
pub mod error;
pub mod id;
pub mod publication;
pub mod record;
pub mod seq;
pub mod session;
pub mod slot;

pub use change::{
    BatchKind, ChangeBatch, ChangeOp, DecodedChange, Row, RowChange, TxnId, TxnMarker,
};
pub use clock::{Clock, FakeClock, SystemClock};
pub use error::ErrorKind;
pub use id::{IdGen, SequentialIdGen, UuidIdGen};
pub use publication::{EntityFilter, OperationMask, Publication};
pub use record::{LogRecord, RecordKind};
pub use seq::{Seq, Watermark};
pub use session::{CloseReason, SessionId, SessionState};
pub use slot::{validate_slot_name, HolderId, RetentionSlot, SlotError, SlotKind};
