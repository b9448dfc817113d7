// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Baseline (initial sync) sources
//!
//! Catch-up copies the current contents of every published entity before
//! streaming starts. Where that data comes from is the embedder's concern.

mod noop;

pub use noop::NoOpBaseline;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeBaseline;

use async_trait::async_trait;
use thiserror::Error;
use tm_core::{EntityFilter, ErrorKind, Row, Seq};

/// One row of baseline data
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineRow {
    pub entity: String,
    pub row: Row,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BaselineError {
    #[error("baseline unavailable: {0}")]
    Unavailable(String),
}

impl BaselineError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Io
    }
}

#[async_trait]
pub trait BaselineSource: Clone + Send + Sync + 'static {
    /// Current rows of the matching entities, consistent as of `as_of`
    async fn snapshot(
        &self,
        entities: &EntityFilter,
        as_of: Seq,
    ) -> Result<Vec<BaselineRow>, BaselineError>;
}
