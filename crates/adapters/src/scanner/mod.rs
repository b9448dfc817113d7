// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dead-row scanner adapters
//!
//! The storage engine owns the data; maintenance only asks it for the next
//! reclaimable unit after a saved position and pays for the page work the
//! unit reports.

mod noop;

pub use noop::NoOpScanner;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeScanner, ScanCall};

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Opaque, ordered position within one shard's scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScanPosition(pub u64);

impl fmt::Display for ScanPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One reclaimable unit and the page work it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadUnit {
    pub position: ScanPosition,
    pub pages_hit: u32,
    pub pages_missed: u32,
    pub pages_dirtied: u32,
}

impl DeadUnit {
    pub fn new(position: u64) -> Self {
        Self {
            position: ScanPosition(position),
            pages_hit: 0,
            pages_missed: 0,
            pages_dirtied: 0,
        }
    }

    pub fn with_pages(mut self, hit: u32, missed: u32, dirtied: u32) -> Self {
        self.pages_hit = hit;
        self.pages_missed = missed;
        self.pages_dirtied = dirtied;
        self
    }
}

/// Errors from scanner operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("shard not found: {0}")]
    ShardNotFound(String),
    #[error("scan failed: {0}")]
    Failed(String),
}

/// Source of reclaimable units, restartable from a saved position
#[async_trait]
pub trait DeadRowScanner: Clone + Send + Sync + 'static {
    /// Units of work maintenance may process independently
    async fn shards(&self) -> Result<Vec<String>, ScanError>;

    /// Next dead unit in `shard` strictly after `after`; `None` ends the pass
    async fn next_dead_unit(
        &self,
        shard: &str,
        after: Option<ScanPosition>,
    ) -> Result<Option<DeadUnit>, ScanError>;
}
