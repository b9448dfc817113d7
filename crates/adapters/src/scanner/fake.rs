// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake scanner for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{DeadRowScanner, DeadUnit, ScanError, ScanPosition};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Recorded scanner call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanCall {
    Shards,
    Next {
        shard: String,
        after: Option<ScanPosition>,
    },
}

#[derive(Default)]
struct FakeScanState {
    shards: BTreeMap<String, Vec<DeadUnit>>,
    failing: Option<String>,
    /// Fail a single call for units after this position
    fail_once: Option<(String, ScanPosition)>,
    calls: Vec<ScanCall>,
}

/// Scanner over in-memory shards of dead units
#[derive(Clone, Default)]
pub struct FakeScanner {
    inner: Arc<Mutex<FakeScanState>>,
}

impl FakeScanner {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeScanState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a shard with its dead units, in any order
    pub fn add_shard(&self, name: &str, mut units: Vec<DeadUnit>) {
        units.sort_by_key(|u| u.position);
        self.state().shards.insert(name.to_string(), units);
    }

    /// Make every scan of `shard` fail
    pub fn fail_shard(&self, name: &str) {
        self.state().failing = Some(name.to_string());
    }

    /// Fail the next scan of `shard` that resumes after `position`
    pub fn fail_once_after(&self, name: &str, position: u64) {
        self.state().fail_once = Some((name.to_string(), ScanPosition(position)));
    }

    pub fn calls(&self) -> Vec<ScanCall> {
        self.state().calls.clone()
    }

    /// Number of `next_dead_unit` calls made against `shard`
    pub fn next_calls(&self, shard: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, ScanCall::Next { shard: s, .. } if s == shard))
            .count()
    }
}

#[async_trait]
impl DeadRowScanner for FakeScanner {
    async fn shards(&self) -> Result<Vec<String>, ScanError> {
        let mut state = self.state();
        state.calls.push(ScanCall::Shards);
        Ok(state.shards.keys().cloned().collect())
    }

    async fn next_dead_unit(
        &self,
        shard: &str,
        after: Option<ScanPosition>,
    ) -> Result<Option<DeadUnit>, ScanError> {
        let mut state = self.state();
        state.calls.push(ScanCall::Next {
            shard: shard.to_string(),
            after,
        });
        if state.failing.as_deref() == Some(shard) {
            return Err(ScanError::Failed(format!("injected failure in {}", shard)));
        }
        let trips = matches!(&state.fail_once, Some((s, p)) if s == shard && after == Some(*p));
        if trips {
            state.fail_once = None;
            return Err(ScanError::Failed(format!("transient failure in {}", shard)));
        }
        let units = state
            .shards
            .get(shard)
            .ok_or_else(|| ScanError::ShardNotFound(shard.to_string()))?;
        Ok(units
            .iter()
            .find(|u| after.map_or(true, |a| u.position > a))
            .cloned())
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
