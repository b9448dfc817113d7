// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! tm-storage: durable state for tidemark
//!
//! - `LogStore`: segmented, checksummed, append-only record log
//! - `SlotRegistry`: retention slots and the global watermark
//! - `PublicationCatalog`: named change filters
//!
//! Every metadata file is replaced atomically (write, fsync, rename).

pub mod atomic;
mod entry;
mod error;
mod index;
mod log_store;
mod publications;
pub mod segment;
mod slots;

pub use entry::RecordEntry;
pub use error::StorageError;
pub use index::SegmentIndex;
pub use log_store::{LogReader, LogStore, ReclaimReport, RetentionLimits, StoreConfig, StoreStats};
pub use publications::PublicationCatalog;
pub use segment::SegmentMeta;
pub use slots::SlotRegistry;
