// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scanner for deployments with no external storage engine.

use super::{DeadRowScanner, DeadUnit, ScanError, ScanPosition};
use async_trait::async_trait;

/// Scanner that never finds anything; maintenance only reclaims log space
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpScanner;

impl NoOpScanner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeadRowScanner for NoOpScanner {
    async fn shards(&self) -> Result<Vec<String>, ScanError> {
        Ok(Vec::new())
    }

    async fn next_dead_unit(
        &self,
        _shard: &str,
        _after: Option<ScanPosition>,
    ) -> Result<Option<DeadUnit>, ScanError> {
        Ok(None)
    }
}
