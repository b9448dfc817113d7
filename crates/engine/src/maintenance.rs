// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background maintenance
//!
//! Each pass drains the scanner's shards through a fixed pool of workers,
//! each paced by its own cost limiter, then reclaims log segments below
//! the slot watermark (or below the retention limits when no slot exists).

use crate::cost::{CostConfig, CostGauge, CostLimiter, CostSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tm_adapters::{DeadRowScanner, ScanPosition};
use tm_core::{Clock, ErrorKind, Seq, Watermark};
use tm_storage::{LogStore, RetentionLimits, SlotRegistry, StorageError};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

/// Configuration for the maintenance loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceConfig {
    /// Pause between passes
    pub naptime: Duration,
    /// Shards scanned concurrently
    pub max_workers: usize,
    pub cost: CostConfig,
    /// Bounds applied only while no slot exists
    pub retention: RetentionLimits,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            naptime: Duration::from_secs(60),
            max_workers: 3,
            cost: CostConfig::default(),
            retention: RetentionLimits::default(),
        }
    }
}

impl MaintenanceConfig {
    pub fn with_naptime(mut self, naptime: Duration) -> Self {
        self.naptime = naptime;
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    pub fn with_cost(mut self, cost: CostConfig) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_retention(mut self, retention: RetentionLimits) -> Self {
        self.retention = retention;
        self
    }
}

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl MaintenanceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MaintenanceError::Storage(e) => e.kind(),
        }
    }
}

/// Outcome of one maintenance pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub shards: usize,
    pub failed_shards: usize,
    pub units: u64,
    pub cost: u64,
    pub sleeps: u64,
    pub watermark: Watermark,
    /// Segments with `max_seq` below this were eligible
    pub reclaim_below: Seq,
    pub reclaimed_segments: usize,
    pub reclaimed_bytes: u64,
    /// Reclaim was refused because a reader still needed a segment
    pub reclaim_deferred: bool,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy)]
struct WorkerTally {
    shards: usize,
    failed_shards: usize,
    units: u64,
    cost: u64,
    sleeps: u64,
}

impl WorkerTally {
    fn add(&mut self, other: WorkerTally) {
        self.shards += other.shards;
        self.failed_shards += other.failed_shards;
        self.units += other.units;
        self.cost += other.cost;
        self.sleeps += other.sleeps;
    }
}

type Positions = Arc<Mutex<HashMap<String, ScanPosition>>>;
type ShardQueue = Arc<Mutex<VecDeque<String>>>;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// One pool member; owns its limiter for the length of a pass
struct ShardWorker<S> {
    id: usize,
    scanner: S,
    positions: Positions,
    limiter: CostLimiter,
}

impl<S: DeadRowScanner> ShardWorker<S> {
    async fn drain(mut self, queue: ShardQueue) -> WorkerTally {
        let mut tally = WorkerTally::default();
        loop {
            let next = locked(&queue).pop_front();
            let Some(shard) = next else {
                break;
            };
            self.scan_shard(&shard, &mut tally).await;
        }
        tally
    }

    async fn scan_shard(&mut self, shard: &str, tally: &mut WorkerTally) {
        tally.shards += 1;
        let mut after = locked(&self.positions).get(shard).copied();
        let mut units = 0u64;
        loop {
            match self.scanner.next_dead_unit(shard, after).await {
                Ok(Some(unit)) => {
                    let cost = self.limiter.config().unit_cost(
                        unit.pages_hit,
                        unit.pages_missed,
                        unit.pages_dirtied,
                    );
                    if self.limiter.charge(cost).await {
                        tally.sleeps += 1;
                    }
                    tally.cost += cost;
                    units += 1;
                    after = Some(unit.position);
                    locked(&self.positions).insert(shard.to_string(), unit.position);
                }
                Ok(None) => {
                    // Completed shards start over next pass
                    locked(&self.positions).remove(shard);
                    break;
                }
                Err(e) => {
                    tally.failed_shards += 1;
                    tracing::warn!(
                        worker = self.id,
                        shard,
                        after = ?after.map(|p| p.0),
                        error = %e,
                        "shard scan failed, resuming next pass"
                    );
                    break;
                }
            }
        }
        tally.units += units;
        tracing::debug!(worker = self.id, shard, units, "shard scanned");
    }
}

/// Scans dead rows and reclaims log segments on a fixed schedule
pub struct MaintenanceWorker<S, C> {
    scanner: S,
    store: Arc<LogStore>,
    registry: Arc<SlotRegistry>,
    config: MaintenanceConfig,
    clock: C,
    positions: Positions,
    gauges: Arc<Vec<CostGauge>>,
    last_pass: Arc<Mutex<Option<PassReport>>>,
}

impl<S: Clone, C: Clone> Clone for MaintenanceWorker<S, C> {
    fn clone(&self) -> Self {
        Self {
            scanner: self.scanner.clone(),
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
            clock: self.clock.clone(),
            positions: Arc::clone(&self.positions),
            gauges: Arc::clone(&self.gauges),
            last_pass: Arc::clone(&self.last_pass),
        }
    }
}

impl<S, C> MaintenanceWorker<S, C>
where
    S: DeadRowScanner,
    C: Clock,
{
    pub fn new(
        scanner: S,
        store: Arc<LogStore>,
        registry: Arc<SlotRegistry>,
        config: MaintenanceConfig,
        clock: C,
    ) -> Self {
        let workers = config.max_workers.max(1);
        let gauges = (0..workers).map(|_| CostGauge::new()).collect();
        Self {
            scanner,
            store,
            registry,
            config,
            clock,
            positions: Arc::new(Mutex::new(HashMap::new())),
            gauges: Arc::new(gauges),
            last_pass: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    /// Limiter state per pool member
    pub fn cost_snapshots(&self) -> Vec<CostSnapshot> {
        self.gauges.iter().map(CostGauge::snapshot).collect()
    }

    pub fn last_pass(&self) -> Option<PassReport> {
        locked(&self.last_pass).clone()
    }

    /// Saved resume position of a partially scanned shard
    pub fn position(&self, shard: &str) -> Option<ScanPosition> {
        locked(&self.positions).get(shard).copied()
    }

    /// Scan every shard once, then reclaim
    pub async fn run_pass(&self) -> Result<PassReport, MaintenanceError> {
        let shards = match self.scanner.shards().await {
            Ok(shards) => shards,
            Err(e) => {
                tracing::warn!(error = %e, "listing shards failed, skipping scan");
                Vec::new()
            }
        };
        let tally = self.scan(shards).await;

        let watermark = self.registry.watermark();
        let reclaim_below = match watermark.bound() {
            Some(seq) => seq,
            None => self
                .store
                .retention_boundary(&self.config.retention, self.clock.now()),
        };
        let mut report = PassReport {
            shards: tally.shards,
            failed_shards: tally.failed_shards,
            units: tally.units,
            cost: tally.cost,
            sleeps: tally.sleeps,
            watermark,
            reclaim_below,
            reclaimed_segments: 0,
            reclaimed_bytes: 0,
            reclaim_deferred: false,
            finished_at: self.clock.now(),
        };

        match self.store.reclaim(reclaim_below) {
            Ok(reclaimed) => {
                report.reclaimed_segments = reclaimed.segments.len();
                report.reclaimed_bytes = reclaimed.bytes;
            }
            Err(e) if e.kind() == ErrorKind::SegmentInUse => {
                tracing::warn!(%reclaim_below, "reclaim deferred to next pass");
                report.reclaim_deferred = true;
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            shards = report.shards,
            units = report.units,
            sleeps = report.sleeps,
            %watermark,
            reclaimed = report.reclaimed_segments,
            bytes = report.reclaimed_bytes,
            "maintenance pass complete"
        );
        *locked(&self.last_pass) = Some(report.clone());
        Ok(report)
    }

    async fn scan(&self, shards: Vec<String>) -> WorkerTally {
        let pool = self.gauges.len().min(shards.len());
        let queue: ShardQueue = Arc::new(Mutex::new(shards.into()));
        let mut set = JoinSet::new();
        for (id, gauge) in self.gauges.iter().take(pool).enumerate() {
            let worker = ShardWorker {
                id,
                scanner: self.scanner.clone(),
                positions: Arc::clone(&self.positions),
                limiter: CostLimiter::with_gauge(self.config.cost.clone(), gauge.clone()),
            };
            set.spawn(worker.drain(Arc::clone(&queue)));
        }

        let mut tally = WorkerTally::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(worker) => tally.add(worker),
                Err(e) => tracing::error!(error = %e, "maintenance worker panicked"),
            }
        }
        tally
    }

    /// Run passes every `naptime` until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            naptime_ms = self.config.naptime.as_millis() as u64,
            workers = self.gauges.len(),
            "maintenance started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.run_pass().await {
                tracing::error!(error = %e, kind = %e.kind(), "maintenance pass failed");
            }
            let closed = tokio::select! {
                _ = tokio::time::sleep(self.config.naptime) => false,
                changed = shutdown.changed() => changed.is_err(),
            };
            if closed {
                break;
            }
        }
        tracing::info!("maintenance stopped");
    }

    /// Start the loop on the current runtime
    pub fn spawn(self) -> MaintenanceHandle {
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(self.run(rx));
        MaintenanceHandle { shutdown: tx, task }
    }
}

/// Owner of a spawned maintenance loop
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Signal the loop and wait for the current pass to finish
    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "maintenance task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
#[path = "maintenance_tests.rs"]
mod tests;
