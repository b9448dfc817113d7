// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Segment index
//!
//! `segments.json` lists live segments in sequence order together with the
//! next sequence number to assign. Reclaim removes entries here before the
//! files are unlinked, so a crash in between leaves only orphan files that
//! recovery deletes.

use crate::atomic::{load_json, store_json};
use crate::error::StorageError;
use crate::segment::SegmentMeta;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tm_core::Seq;

pub const INDEX_FILE: &str = "segments.json";
const INDEX_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentIndex {
    pub version: u32,
    pub next_seq: Seq,
    pub next_segment_id: u64,
    pub segments: Vec<SegmentMeta>,
}

impl Default for SegmentIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            next_seq: Seq(1),
            next_segment_id: 1,
            segments: Vec::new(),
        }
    }
}

impl SegmentIndex {
    pub fn load(dir: &Path) -> Result<Option<Self>, StorageError> {
        load_json(&dir.join(INDEX_FILE))
    }

    pub fn persist(&self, dir: &Path) -> Result<(), StorageError> {
        store_json(&dir.join(INDEX_FILE), self)
    }

    /// Oldest retained sequence, or the next one to assign when empty
    pub fn oldest_seq(&self) -> Seq {
        self.segments
            .iter()
            .find(|s| !s.is_empty())
            .map_or(self.next_seq, |s| s.min_seq)
    }

    pub fn last_seq(&self) -> Seq {
        self.next_seq.saturating_sub(1)
    }

    /// The unsealed tail segment, if any
    pub fn active_mut(&mut self) -> Option<&mut SegmentMeta> {
        self.segments.last_mut().filter(|s| !s.sealed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.bytes).sum()
    }

    /// Segments that may hold records at or after `from`
    pub fn covering(&self, from: Seq) -> Vec<SegmentMeta> {
        self.segments
            .iter()
            .filter(|s| !s.is_empty() && s.max_seq >= from)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
#[path = "index_tests.rs"]
mod tests;
