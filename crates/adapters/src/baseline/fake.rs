// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake baseline source for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{BaselineError, BaselineRow, BaselineSource};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tm_core::{EntityFilter, Row, Seq};

#[derive(Default)]
struct FakeBaselineState {
    rows: Vec<BaselineRow>,
    unavailable: bool,
    snapshots: Vec<Seq>,
}

#[derive(Clone, Default)]
pub struct FakeBaseline {
    inner: Arc<Mutex<FakeBaselineState>>,
}

impl FakeBaseline {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeBaselineState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_row(&self, entity: &str, row: Row) {
        self.state().rows.push(BaselineRow {
            entity: entity.to_string(),
            row,
        });
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// `as_of` positions of every snapshot taken
    pub fn snapshots(&self) -> Vec<Seq> {
        self.state().snapshots.clone()
    }
}

#[async_trait]
impl BaselineSource for FakeBaseline {
    async fn snapshot(
        &self,
        entities: &EntityFilter,
        as_of: Seq,
    ) -> Result<Vec<BaselineRow>, BaselineError> {
        let mut state = self.state();
        state.snapshots.push(as_of);
        if state.unavailable {
            return Err(BaselineError::Unavailable("fake baseline offline".to_string()));
        }
        Ok(state
            .rows
            .iter()
            .filter(|r| entities.contains(&r.entity))
            .cloned()
            .collect())
    }
}
