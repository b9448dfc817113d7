// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cost-based pacing for background work
//!
//! Workers charge the limiter for every unit they process. Once the
//! accumulated cost reaches the limit the worker sleeps for one
//! `sleep_unit` and starts over from zero. A single oversized charge still
//! sleeps exactly once. The limiter never holds a lock while sleeping.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Pacing parameters and per-page costs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostConfig {
    pub limit: u64,
    /// Pause once the limit is reached; zero disables pacing
    pub sleep_unit: Duration,
    pub page_hit: u64,
    pub page_miss: u64,
    pub page_dirty: u64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            limit: 200,
            sleep_unit: Duration::from_millis(2),
            page_hit: 1,
            page_miss: 2,
            page_dirty: 20,
        }
    }
}

impl CostConfig {
    pub fn new(limit: u64, sleep_unit: Duration) -> Self {
        Self {
            limit,
            sleep_unit,
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_sleep_unit(mut self, sleep_unit: Duration) -> Self {
        self.sleep_unit = sleep_unit;
        self
    }

    pub fn with_page_costs(mut self, hit: u64, miss: u64, dirty: u64) -> Self {
        self.page_hit = hit;
        self.page_miss = miss;
        self.page_dirty = dirty;
        self
    }

    /// Cost of a unit that touched the given pages
    pub fn unit_cost(&self, hit: u32, missed: u32, dirtied: u32) -> u64 {
        u64::from(hit) * self.page_hit
            + u64::from(missed) * self.page_miss
            + u64::from(dirtied) * self.page_dirty
    }
}

/// Read-only view of a worker's limiter for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostSnapshot {
    pub accumulated: u64,
    pub limit: u64,
    pub sleeps: u64,
}

#[derive(Debug, Default)]
struct GaugeInner {
    accumulated: AtomicU64,
    limit: AtomicU64,
    sleeps: AtomicU64,
}

/// Shared gauge a limiter publishes into
#[derive(Debug, Clone, Default)]
pub struct CostGauge(Arc<GaugeInner>);

impl CostGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CostSnapshot {
        CostSnapshot {
            accumulated: self.0.accumulated.load(Ordering::Relaxed),
            limit: self.0.limit.load(Ordering::Relaxed),
            sleeps: self.0.sleeps.load(Ordering::Relaxed),
        }
    }
}

/// Per-worker cooperative throttle
#[derive(Debug)]
pub struct CostLimiter {
    config: CostConfig,
    accumulated: u64,
    sleeps: u64,
    gauge: CostGauge,
}

impl CostLimiter {
    pub fn new(config: CostConfig) -> Self {
        Self::with_gauge(config, CostGauge::new())
    }

    /// Limiter that reports into an existing gauge
    pub fn with_gauge(config: CostConfig, gauge: CostGauge) -> Self {
        gauge.0.limit.store(config.limit, Ordering::Relaxed);
        gauge.0.accumulated.store(0, Ordering::Relaxed);
        Self {
            config,
            accumulated: 0,
            sleeps: 0,
            gauge,
        }
    }

    /// Add `units` of cost, sleeping once if the limit is reached.
    ///
    /// Returns whether the caller was suspended.
    pub async fn charge(&mut self, units: u64) -> bool {
        self.accumulated = self.accumulated.saturating_add(units);
        let crossed = self.accumulated >= self.config.limit;
        if crossed {
            self.accumulated = 0;
        }
        self.gauge
            .0
            .accumulated
            .store(self.accumulated, Ordering::Relaxed);

        if !crossed || self.config.sleep_unit.is_zero() {
            return false;
        }
        self.sleeps += 1;
        self.gauge.0.sleeps.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.config.sleep_unit).await;
        true
    }

    pub fn accumulated(&self) -> u64 {
        self.accumulated
    }

    pub fn limit(&self) -> u64 {
        self.config.limit
    }

    /// Sleeps taken by this limiter
    pub fn sleeps(&self) -> u64 {
        self.sleeps
    }

    pub fn config(&self) -> &CostConfig {
        &self.config
    }

    pub fn gauge(&self) -> &CostGauge {
        &self.gauge
    }
}

#[cfg(test)]
#[path = "cost_tests.rs"]
mod tests;
