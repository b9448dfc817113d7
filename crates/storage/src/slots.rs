// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Slot registry
//!
//! Process-wide table of retention slots behind one lock. Slots are few
//! and change rarely next to the data path, so every mutation takes the
//! registry lock and persists the whole table before the in-memory copy
//! changes. A crash therefore never exposes a watermark that moved
//! further than what reached disk.
//!
//! Holders are not persisted: after a restart every slot is inactive.

use crate::atomic::{load_json, store_json};
use crate::error::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tm_core::{validate_slot_name, HolderId, RetentionSlot, Seq, SlotError, SlotKind, Watermark};

pub const SLOTS_FILE: &str = "slots.json";
const SLOTS_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SlotTable {
    version: u32,
    slots: Vec<RetentionSlot>,
}

type Slots = BTreeMap<String, RetentionSlot>;

/// Durable table of retention slots
pub struct SlotRegistry {
    path: Option<PathBuf>,
    slots: Mutex<Slots>,
}

impl SlotRegistry {
    /// Load the registry persisted in `dir`, or start empty
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(SLOTS_FILE);
        let table: Option<SlotTable> = load_json(&path)?;
        let slots: Slots = table
            .map(|t| t.slots)
            .unwrap_or_default()
            .into_iter()
            .map(|slot| (slot.name.clone(), slot))
            .collect();
        tracing::info!(slots = slots.len(), path = %path.display(), "slot registry loaded");
        Ok(Self {
            path: Some(path),
            slots: Mutex::new(slots),
        })
    }

    /// A registry that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            slots: Mutex::new(Slots::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, slots: &Slots) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let table = SlotTable {
            version: SLOTS_VERSION,
            slots: slots.values().cloned().collect(),
        };
        store_json(path, &table)
    }

    /// Persist `next` and only then make it the live table
    fn commit(&self, live: &mut Slots, next: Slots) -> Result<(), StorageError> {
        self.persist(&next)?;
        *live = next;
        Ok(())
    }

    /// Create a slot whose positions start at `start`
    pub fn create(
        &self,
        name: &str,
        kind: SlotKind,
        start: Seq,
        created_at: DateTime<Utc>,
    ) -> Result<RetentionSlot, StorageError> {
        self.create_with_restart(name, kind, start, start, created_at)
    }

    /// Create a slot whose changes begin after `start` but whose reader
    /// must begin at `restart`, the first record of a transaction that was
    /// still open at `start`
    pub fn create_with_restart(
        &self,
        name: &str,
        kind: SlotKind,
        restart: Seq,
        start: Seq,
        created_at: DateTime<Utc>,
    ) -> Result<RetentionSlot, StorageError> {
        validate_slot_name(name)?;
        let mut live = self.lock();
        if live.contains_key(name) {
            return Err(SlotError::DuplicateSlot(name.to_string()).into());
        }
        let slot = RetentionSlot::new(name, kind, created_at)
            .starting_at(start)
            .restarting_at(restart);
        let mut next = live.clone();
        next.insert(name.to_string(), slot.clone());
        self.commit(&mut live, next)?;
        tracing::info!(slot = name, %kind, %start, restart = %slot.restart_seq, "slot created");
        Ok(slot)
    }

    /// Remove a slot; refused while a session holds it
    pub fn drop_slot(&self, name: &str) -> Result<RetentionSlot, StorageError> {
        let mut live = self.lock();
        let slot = live
            .get(name)
            .ok_or_else(|| SlotError::SlotNotFound(name.to_string()))?;
        if let Some(holder) = &slot.holder {
            return Err(SlotError::SlotBusy {
                slot: name.to_string(),
                holder: holder.clone(),
            }
            .into());
        }
        let mut next = live.clone();
        let removed = next.remove(name);
        self.commit(&mut live, next)?;
        tracing::info!(slot = name, "slot dropped");
        removed.ok_or_else(|| SlotError::SlotNotFound(name.to_string()).into())
    }

    /// Mark `holder` as the slot's single active session
    pub fn acquire(&self, name: &str, holder: &HolderId) -> Result<RetentionSlot, StorageError> {
        let mut live = self.lock();
        let slot = live
            .get_mut(name)
            .ok_or_else(|| SlotError::SlotNotFound(name.to_string()))?;
        slot.acquire(holder)?;
        Ok(slot.clone())
    }

    pub fn release(&self, name: &str, holder: &HolderId) -> Result<(), StorageError> {
        let mut live = self.lock();
        let slot = live
            .get_mut(name)
            .ok_or_else(|| SlotError::SlotNotFound(name.to_string()))?;
        slot.release(holder)?;
        Ok(())
    }

    /// Move a slot forward; durable before the watermark can move
    pub fn advance(
        &self,
        name: &str,
        restart: Seq,
        confirmed: Seq,
    ) -> Result<RetentionSlot, StorageError> {
        let mut live = self.lock();
        let current = live
            .get(name)
            .ok_or_else(|| SlotError::SlotNotFound(name.to_string()))?;
        let advanced = current.advanced(restart, confirmed)?;
        if advanced == *current {
            return Ok(advanced);
        }
        let mut next = live.clone();
        next.insert(name.to_string(), advanced.clone());
        self.commit(&mut live, next)?;
        tracing::debug!(slot = name, %restart, %confirmed, "slot advanced");
        Ok(advanced)
    }

    /// Minimum restart position over all slots
    pub fn watermark(&self) -> Watermark {
        Watermark::min_of(self.lock().values().map(|s| s.restart_seq))
    }

    pub fn get(&self, name: &str) -> Option<RetentionSlot> {
        self.lock().get(name).cloned()
    }

    pub fn list(&self) -> Vec<RetentionSlot> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Rewrite the persisted table from memory
    pub fn flush(&self) -> Result<(), StorageError> {
        let live = self.lock();
        self.persist(&live)
    }
}

#[cfg(test)]
#[path = "slots_tests.rs"]
mod tests;
