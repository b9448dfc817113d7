// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Segmented, append-only log store
//!
//! Records get dense sequence numbers starting at 1 and are fsync'd before
//! `append` returns. Segments roll over once they reach the configured size
//! and only sealed segments are ever reclaimed. Readers pin their position
//! so reclaim can refuse to delete a segment that is still being read.

use crate::entry::RecordEntry;
use crate::error::StorageError;
use crate::index::SegmentIndex;
use crate::segment::{self, SegmentIter, SegmentMeta, SegmentWriter, SEGMENT_EXTENSION};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tm_core::{LogRecord, RecordKind, Seq};
use tokio::sync::watch;

/// Log store tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Seal the active segment once it reaches this many bytes
    pub segment_bytes: u64,
    /// Also seal after this many records (0 = no record limit)
    pub records_per_segment: u64,
    /// fsync after every append call
    pub sync_on_append: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            segment_bytes: 16 * 1024 * 1024,
            records_per_segment: 0,
            sync_on_append: true,
        }
    }
}

impl StoreConfig {
    pub fn with_segment_bytes(mut self, bytes: u64) -> Self {
        self.segment_bytes = bytes;
        self
    }

    pub fn with_records_per_segment(mut self, records: u64) -> Self {
        self.records_per_segment = records;
        self
    }

    pub fn with_sync_on_append(mut self, sync: bool) -> Self {
        self.sync_on_append = sync;
        self
    }

    fn is_full(&self, meta: &SegmentMeta) -> bool {
        meta.bytes >= self.segment_bytes
            || (self.records_per_segment > 0 && meta.records >= self.records_per_segment)
    }
}

/// Slot-independent bounds on how much log to keep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionLimits {
    pub max_bytes: Option<u64>,
    pub max_age: Option<Duration>,
}

impl RetentionLimits {
    pub fn is_unlimited(&self) -> bool {
        self.max_bytes.is_none() && self.max_age.is_none()
    }
}

/// What a reclaim call removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub segments: Vec<u64>,
    pub records: u64,
    pub bytes: u64,
    /// Oldest retained sequence after the call
    pub oldest_seq: Seq,
}

impl ReclaimReport {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Point-in-time view of the store for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub oldest_seq: Seq,
    pub last_seq: Seq,
    pub segments: usize,
    pub bytes: u64,
    pub readers: usize,
}

#[derive(Default)]
struct PinTable {
    next_id: AtomicU64,
    pins: Mutex<BTreeMap<u64, Seq>>,
}

impl PinTable {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, Seq>> {
        self.pins.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, at: Seq) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, at);
        id
    }

    fn update(&self, id: u64, at: Seq) {
        if let Some(pos) = self.lock().get_mut(&id) {
            *pos = at;
        }
    }

    fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn lowest(&self) -> Option<Seq> {
        self.lock().values().min().copied()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Keeps a reader's position visible to reclaim until dropped
struct ReadPin {
    id: u64,
    table: Arc<PinTable>,
}

impl Drop for ReadPin {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}

struct StoreInner {
    index: SegmentIndex,
    writer: Option<SegmentWriter>,
}

/// Durable, segmented record log
pub struct LogStore {
    dir: PathBuf,
    config: StoreConfig,
    inner: Mutex<StoreInner>,
    pins: Arc<PinTable>,
    tail: watch::Sender<Seq>,
}

impl LogStore {
    /// Open or create a store in `dir`, repairing a torn tail if present
    pub fn open(dir: impl Into<PathBuf>, config: StoreConfig) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut index = SegmentIndex::load(&dir)?.unwrap_or_default();
        remove_orphans(&dir, &index)?;

        for meta in &index.segments {
            let path = meta.path(&dir);
            if !path.exists() {
                return Err(StorageError::MissingSegment {
                    segment: meta.id,
                    path,
                });
            }
        }

        let mut writer = None;
        if let Some(active) = index.active_mut() {
            recover_active(&dir, active)?;
            writer = Some(SegmentWriter::reopen(&dir, active.id)?);
            index.next_seq = active.max_seq.next();
        }
        index.persist(&dir)?;

        tracing::info!(
            dir = %dir.display(),
            segments = index.segments.len(),
            oldest_seq = %index.oldest_seq(),
            last_seq = %index.last_seq(),
            "log store opened"
        );

        let (tail, _) = watch::channel(index.last_seq());
        Ok(Self {
            dir,
            config,
            inner: Mutex::new(StoreInner { index, writer }),
            pins: Arc::new(PinTable::default()),
            tail,
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append one record; durable before returning when `sync_on_append`
    pub fn append(&self, payload: impl Into<Vec<u8>>, kind: RecordKind) -> Result<Seq, StorageError> {
        let seqs = self.append_batch(vec![(kind, payload.into())])?;
        Ok(seqs.first().copied().unwrap_or(Seq::ZERO))
    }

    /// Append records in order with a single fsync at the end.
    ///
    /// Returns the assigned sequences, which are contiguous.
    pub fn append_batch(
        &self,
        records: Vec<(RecordKind, Vec<u8>)>,
    ) -> Result<Vec<Seq>, StorageError> {
        let mut inner = self.lock();
        let StoreInner { index, writer } = &mut *inner;
        let mut seqs = Vec::with_capacity(records.len());

        for (kind, payload) in records {
            if writer.is_none() {
                *writer = Some(self.start_segment(index)?);
            }
            let active_writer = writer
                .as_mut()
                .ok_or_else(|| std::io::Error::other("no active segment"))?;
            let seq = index.next_seq;
            let bytes = active_writer.write(&RecordEntry::new(seq, kind, payload))?;
            index.next_seq = seq.next();
            seqs.push(seq);

            let full = match index.active_mut() {
                Some(meta) => {
                    meta.record_appended(seq, bytes);
                    self.config.is_full(meta)
                }
                None => false,
            };
            if full {
                active_writer.sync()?;
                *writer = None;
                self.seal_active(index)?;
            }
        }

        if self.config.sync_on_append {
            if let Some(active_writer) = writer.as_mut() {
                active_writer.sync()?;
            }
        }

        if let Some(last) = seqs.last() {
            self.tail.send_replace(*last);
        }
        Ok(seqs)
    }

    fn start_segment(&self, index: &mut SegmentIndex) -> Result<SegmentWriter, StorageError> {
        let id = index.next_segment_id;
        let writer = SegmentWriter::create(&self.dir, id)?;
        index.next_segment_id += 1;
        index
            .segments
            .push(SegmentMeta::new(id, index.next_seq, Utc::now()));
        index.persist(&self.dir)?;
        tracing::debug!(segment = id, min_seq = %index.next_seq, "segment created");
        Ok(writer)
    }

    fn seal_active(&self, index: &mut SegmentIndex) -> Result<(), StorageError> {
        if let Some(meta) = index.active_mut() {
            meta.sealed = true;
            meta.sealed_at = Some(Utc::now());
            tracing::debug!(
                segment = meta.id,
                min_seq = %meta.min_seq,
                max_seq = %meta.max_seq,
                bytes = meta.bytes,
                "segment sealed"
            );
        }
        index.persist(&self.dir)
    }

    /// Lazily stream records with `seq >= from`, up to the last record
    /// appended when the reader was opened.
    pub fn read(&self, from: Seq) -> Result<LogReader, StorageError> {
        let inner = self.lock();
        let index = &inner.index;
        let start = from.max(Seq(1));
        let oldest = index.oldest_seq();
        if start < oldest {
            return Err(StorageError::Reclaimed {
                requested: from,
                oldest,
            });
        }

        let pin = ReadPin {
            id: self.pins.register(start),
            table: Arc::clone(&self.pins),
        };
        Ok(LogReader {
            dir: self.dir.clone(),
            segments: index.covering(start).into(),
            current: None,
            next: start,
            upper: index.last_seq(),
            pin,
            done: false,
        })
    }

    /// Delete sealed segments whose `max_seq < below`.
    ///
    /// Refuses with `SegmentInUse` if any open reader is positioned inside
    /// one of them; nothing is deleted in that case.
    pub fn reclaim(&self, below: Seq) -> Result<ReclaimReport, StorageError> {
        let mut inner = self.lock();
        let count = inner
            .index
            .segments
            .iter()
            .take_while(|s| s.sealed && s.max_seq < below)
            .count();
        if count == 0 {
            return Ok(ReclaimReport {
                oldest_seq: inner.index.oldest_seq(),
                ..ReclaimReport::default()
            });
        }

        let doomed: Vec<SegmentMeta> = inner.index.segments[..count].to_vec();
        if let Some(pinned_at) = self.pins.lowest() {
            if let Some(seg) = doomed.iter().find(|s| pinned_at <= s.max_seq) {
                tracing::error!(
                    segment = seg.id,
                    min_seq = %seg.min_seq,
                    max_seq = %seg.max_seq,
                    %pinned_at,
                    %below,
                    "refusing to reclaim segment pinned by an open reader"
                );
                return Err(StorageError::SegmentInUse {
                    segment: seg.id,
                    min_seq: seg.min_seq,
                    max_seq: seg.max_seq,
                    pinned_at,
                });
            }
        }

        // Index first: a crash before the unlinks leaves orphans, not holes
        let mut next = inner.index.clone();
        next.segments.drain(..count);
        next.persist(&self.dir)?;
        inner.index = next;

        let mut report = ReclaimReport {
            oldest_seq: inner.index.oldest_seq(),
            ..ReclaimReport::default()
        };
        for seg in doomed {
            match fs::remove_file(seg.path(&self.dir)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(segment = seg.id, error = %e, "failed to unlink reclaimed segment")
                }
            }
            report.segments.push(seg.id);
            report.records += seg.records;
            report.bytes += seg.bytes;
        }
        tracing::info!(
            segments = report.segments.len(),
            bytes = report.bytes,
            oldest_seq = %report.oldest_seq,
            "reclaimed log segments"
        );
        Ok(report)
    }

    /// Lowest sequence that retention limits allow keeping.
    ///
    /// With no limits every sealed segment is eligible.
    pub fn retention_boundary(&self, limits: &RetentionLimits, now: DateTime<Utc>) -> Seq {
        let inner = self.lock();
        let index = &inner.index;
        let mut boundary = index.next_seq;
        if limits.is_unlimited() {
            return boundary;
        }

        let mut kept_bytes = 0u64;
        for seg in index.segments.iter().rev() {
            if seg.sealed {
                let over_size = limits
                    .max_bytes
                    .is_some_and(|max| kept_bytes + seg.bytes > max);
                let too_old = limits.max_age.is_some_and(|age| {
                    chrono::Duration::from_std(age)
                        .map(|age| seg.sealed_at.unwrap_or(seg.created_at) + age < now)
                        .unwrap_or(false)
                });
                if over_size || too_old {
                    break;
                }
            }
            kept_bytes += seg.bytes;
            boundary = seg.min_seq;
        }
        boundary
    }

    pub fn last_seq(&self) -> Seq {
        self.lock().index.last_seq()
    }

    pub fn oldest_seq(&self) -> Seq {
        self.lock().index.oldest_seq()
    }

    pub fn segments(&self) -> Vec<SegmentMeta> {
        self.lock().index.segments.clone()
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.lock();
        StoreStats {
            oldest_seq: inner.index.oldest_seq(),
            last_seq: inner.index.last_seq(),
            segments: inner.index.segments.len(),
            bytes: inner.index.total_bytes(),
            readers: self.pins.len(),
        }
    }

    /// Watch the newest appended sequence
    pub fn subscribe(&self) -> watch::Receiver<Seq> {
        self.tail.subscribe()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Flush the active segment and the index
    pub fn sync(&self) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if let Some(writer) = inner.writer.as_mut() {
            writer.sync()?;
        }
        inner.index.persist(&self.dir)
    }
}

/// Lazy iterator over a contiguous range of the log
pub struct LogReader {
    dir: PathBuf,
    segments: VecDeque<SegmentMeta>,
    current: Option<SegmentIter>,
    next: Seq,
    upper: Seq,
    pin: ReadPin,
    done: bool,
}

impl LogReader {
    /// Sequence of the next record this reader will yield
    pub fn position(&self) -> Seq {
        self.next
    }

    /// Last sequence this reader will yield
    pub fn upper_bound(&self) -> Seq {
        self.upper
    }

    fn fail(&mut self, err: StorageError) -> Option<Result<LogRecord, StorageError>> {
        self.done = true;
        Some(Err(err))
    }
}

impl Iterator for LogReader {
    type Item = Result<LogRecord, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done || self.next > self.upper {
                return None;
            }
            if self.current.is_none() {
                let Some(meta) = self.segments.pop_front() else {
                    let err = StorageError::Gap {
                        expected: self.next,
                        found: self.upper.next(),
                    };
                    return self.fail(err);
                };
                match SegmentIter::open(&meta.path(&self.dir), meta.id, self.next) {
                    Ok(iter) => self.current = Some(iter),
                    Err(e) => return self.fail(e),
                }
            }
            let Some(iter) = self.current.as_mut() else {
                continue;
            };
            match iter.next() {
                None => self.current = None,
                Some(Ok(record)) => {
                    if record.seq != self.next {
                        let err = StorageError::Gap {
                            expected: self.next,
                            found: record.seq,
                        };
                        return self.fail(err);
                    }
                    self.next = record.seq.next();
                    self.pin.table.update(self.pin.id, self.next);
                    return Some(Ok(record));
                }
                Some(Err(e)) => return self.fail(e),
            }
        }
    }
}

fn recover_active(dir: &Path, active: &mut SegmentMeta) -> Result<(), StorageError> {
    let path = active.path(dir);
    let scan = segment::scan(&path, active.id)?;
    if scan.has_torn_tail() {
        tracing::warn!(
            segment = active.id,
            valid_len = scan.valid_len,
            file_len = scan.file_len,
            reason = scan.corruption.as_deref().unwrap_or("trailing bytes"),
            "truncating torn tail of active segment"
        );
        segment::truncate(&path, scan.valid_len)?;
    }
    if let Some(first) = scan.first_seq {
        if first != active.min_seq {
            return Err(StorageError::Corrupted {
                segment: active.id,
                line: 1,
                reason: format!("expected first seq {}, found {}", active.min_seq, first),
            });
        }
    }
    active.records = scan.records;
    active.bytes = scan.valid_len;
    active.max_seq = scan
        .last_seq
        .unwrap_or_else(|| active.min_seq.saturating_sub(1));
    Ok(())
}

/// Delete segment files the index no longer knows about and stale temp files
fn remove_orphans(dir: &Path, index: &SegmentIndex) -> Result<(), StorageError> {
    let live: HashSet<u64> = index.segments.iter().map(|s| s.id).collect();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let ext = path.extension().and_then(|e| e.to_str());
        let orphan = match ext {
            Some("tmp") => true,
            Some(SEGMENT_EXTENSION) => path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
                .is_some_and(|id| !live.contains(&id)),
            _ => false,
        };
        if orphan {
            tracing::warn!(path = %path.display(), "removing orphaned log file");
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "log_store_tests.rs"]
mod tests;
