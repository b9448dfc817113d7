// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
// Enable coverage(off) attribute for excluding test infrastructure
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Adapters for the world outside the log: the storage engine's dead-row
//! scanner, consumer channels and baseline data for initial sync

pub mod baseline;
pub mod channel;
pub mod scanner;
pub mod traced;

pub use baseline::{BaselineError, BaselineRow, BaselineSource, NoOpBaseline};
pub use channel::{ChannelError, ConsumerChannel, MpscChannel};
pub use scanner::{DeadRowScanner, DeadUnit, NoOpScanner, ScanError, ScanPosition};
pub use traced::{TracedBaseline, TracedChannel, TracedScanner};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub use baseline::FakeBaseline;
#[cfg(any(test, feature = "test-support"))]
pub use channel::FakeChannel;
#[cfg(any(test, feature = "test-support"))]
pub use scanner::{FakeScanner, ScanCall};
