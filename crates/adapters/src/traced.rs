// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traced adapter wrappers for consistent observability

use crate::baseline::{BaselineError, BaselineRow, BaselineSource};
use crate::channel::{ChannelError, ConsumerChannel};
use crate::scanner::{DeadRowScanner, DeadUnit, ScanError, ScanPosition};
use async_trait::async_trait;
use tm_core::{ChangeBatch, EntityFilter, Seq};

/// Wrapper that adds tracing to any DeadRowScanner
#[derive(Clone)]
pub struct TracedScanner<S> {
    inner: S,
}

impl<S> TracedScanner<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: DeadRowScanner> DeadRowScanner for TracedScanner<S> {
    async fn shards(&self) -> Result<Vec<String>, ScanError> {
        let result = self.inner.shards().await;
        match &result {
            Ok(shards) => tracing::debug!(count = shards.len(), "scanner shards"),
            Err(e) => tracing::error!(error = %e, "listing shards failed"),
        }
        result
    }

    async fn next_dead_unit(
        &self,
        shard: &str,
        after: Option<ScanPosition>,
    ) -> Result<Option<DeadUnit>, ScanError> {
        let result = self.inner.next_dead_unit(shard, after).await;
        match &result {
            Ok(Some(unit)) => tracing::trace!(
                shard,
                position = %unit.position,
                hit = unit.pages_hit,
                missed = unit.pages_missed,
                dirtied = unit.pages_dirtied,
                "dead unit"
            ),
            Ok(None) => tracing::trace!(shard, "scan pass complete"),
            Err(e) => tracing::error!(shard, error = %e, "scan failed"),
        }
        result
    }
}

/// Wrapper that adds tracing to any ConsumerChannel
#[derive(Clone)]
pub struct TracedChannel<C> {
    inner: C,
}

impl<C> TracedChannel<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<C: ConsumerChannel> ConsumerChannel for TracedChannel<C> {
    async fn send(&self, batch: &ChangeBatch) -> Result<(), ChannelError> {
        let span = tracing::info_span!(
            "channel.send",
            commit_seq = %batch.commit_seq,
            xid = %batch.xid,
        );
        let _guard = span.enter();

        let start = std::time::Instant::now();
        let result = self.inner.send(batch).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(()) => tracing::debug!(
                changes = batch.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "batch delivered"
            ),
            Err(ChannelError::Full) => tracing::debug!("consumer backpressure"),
            Err(e) => tracing::warn!(error = %e, "delivery failed"),
        }
        result
    }
}

/// Wrapper that adds tracing to any BaselineSource
#[derive(Clone)]
pub struct TracedBaseline<B> {
    inner: B,
}

impl<B> TracedBaseline<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<B: BaselineSource> BaselineSource for TracedBaseline<B> {
    async fn snapshot(
        &self,
        entities: &EntityFilter,
        as_of: Seq,
    ) -> Result<Vec<BaselineRow>, BaselineError> {
        let span = tracing::info_span!("baseline.snapshot", %as_of);
        let _guard = span.enter();

        tracing::info!("starting");
        let start = std::time::Instant::now();
        let result = self.inner.snapshot(entities, as_of).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(rows) => tracing::info!(
                rows = rows.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "snapshot taken"
            ),
            Err(e) => tracing::error!(
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "snapshot failed"
            ),
        }
        result
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
