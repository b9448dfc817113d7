// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! tidemark engine: decoding, streaming sessions, cost-paced maintenance
//! and the runtime that fronts them

mod cost;
mod decoder;
mod error;
mod maintenance;
mod monitor;
mod runtime;
mod session;

pub use cost::{CostConfig, CostGauge, CostLimiter, CostSnapshot};
pub use decoder::{DecodeError, Decoder, DecoderConfig};
pub use error::RuntimeError;
pub use maintenance::{
    MaintenanceConfig, MaintenanceError, MaintenanceHandle, MaintenanceWorker, PassReport,
};
pub use monitor::{MonitorSnapshot, SlotStatus, StoreStatus};
pub use runtime::{Runtime, RuntimeConfig, RuntimeDeps};
pub use session::{
    SessionCommand, SessionConfig, SessionDeps, SessionError, SessionHandle, SessionInfo,
    StreamingSession,
};
