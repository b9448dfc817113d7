// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake consumer channel for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{ChannelError, ConsumerChannel};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tm_core::{ChangeBatch, Seq};

#[derive(Default)]
struct FakeChannelState {
    delivered: Vec<ChangeBatch>,
    /// Errors returned by the next sends, in order
    scripted: VecDeque<ChannelError>,
    attempts: usize,
    closed: bool,
}

/// Channel that records delivered batches and can inject failures
#[derive(Clone, Default)]
pub struct FakeChannel {
    inner: Arc<Mutex<FakeChannelState>>,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeChannelState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next send with `err`
    pub fn push_failure(&self, err: ChannelError) {
        self.state().scripted.push_back(err);
    }

    /// Fail every later send with `Closed`
    pub fn close(&self) {
        self.state().closed = true;
    }

    pub fn batches(&self) -> Vec<ChangeBatch> {
        self.state().delivered.clone()
    }

    pub fn commit_seqs(&self) -> Vec<Seq> {
        self.state().delivered.iter().map(|b| b.commit_seq).collect()
    }

    /// Total send calls, including failed ones
    pub fn attempts(&self) -> usize {
        self.state().attempts
    }
}

#[async_trait]
impl ConsumerChannel for FakeChannel {
    async fn send(&self, batch: &ChangeBatch) -> Result<(), ChannelError> {
        let mut state = self.state();
        state.attempts += 1;
        if state.closed {
            return Err(ChannelError::Closed);
        }
        if let Some(err) = state.scripted.pop_front() {
            return Err(err);
        }
        state.delivered.push(batch.clone());
        Ok(())
    }
}
