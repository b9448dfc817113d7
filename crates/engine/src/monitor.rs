// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only monitoring snapshot
//!
//! Per-slot lag is measured against the newest appended sequence, so a
//! slot nobody streams from shows how much log it is holding back.

use crate::cost::CostSnapshot;
use crate::maintenance::PassReport;
use crate::session::SessionInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tm_core::{RetentionSlot, Seq, SlotKind, Watermark};
use tm_storage::StoreStats;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotStatus {
    pub name: String,
    pub kind: SlotKind,
    pub restart_seq: Seq,
    pub confirmed_seq: Seq,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    /// Records retained for this slot
    pub lag: u64,
}

impl SlotStatus {
    pub fn from_slot(slot: &RetentionSlot, last_seq: Seq) -> Self {
        Self {
            name: slot.name.clone(),
            kind: slot.kind,
            restart_seq: slot.restart_seq,
            confirmed_seq: slot.confirmed_seq,
            active: slot.is_active(),
            holder: slot.holder.as_ref().map(|h| h.0.clone()),
            lag: slot.lag(last_seq),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStatus {
    pub oldest_seq: Seq,
    pub last_seq: Seq,
    pub segments: usize,
    pub bytes: u64,
    /// Open log readers
    pub readers: usize,
}

impl From<StoreStats> for StoreStatus {
    fn from(stats: StoreStats) -> Self {
        Self {
            oldest_seq: stats.oldest_seq,
            last_seq: stats.last_seq,
            segments: stats.segments,
            bytes: stats.bytes,
            readers: stats.readers,
        }
    }
}

/// Everything an operator status view shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub taken_at: DateTime<Utc>,
    pub store: StoreStatus,
    pub watermark: Watermark,
    pub slots: Vec<SlotStatus>,
    pub sessions: Vec<SessionInfo>,
    /// Cost limiter state per maintenance worker
    pub workers: Vec<CostSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_pass: Option<PassReport>,
}

impl MonitorSnapshot {
    pub fn new(
        taken_at: DateTime<Utc>,
        stats: StoreStats,
        slots: &[RetentionSlot],
        sessions: Vec<SessionInfo>,
        workers: Vec<CostSnapshot>,
        last_pass: Option<PassReport>,
    ) -> Self {
        let last_seq = stats.last_seq;
        Self {
            taken_at,
            store: stats.into(),
            watermark: Watermark::min_of(slots.iter().map(|s| s.restart_seq)),
            slots: slots
                .iter()
                .map(|s| SlotStatus::from_slot(s, last_seq))
                .collect(),
            sessions,
            workers,
            last_pass,
        }
    }

    /// Slot holding back the most log, if any
    pub fn laggiest_slot(&self) -> Option<&SlotStatus> {
        self.slots.iter().max_by_key(|s| s.lag)
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
