// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log segments
//!
//! A segment is one append-only file of framed records covering a
//! contiguous sequence range. Only the newest segment is open for writing;
//! once sealed it is immutable until reclaimed as a whole.

use crate::entry::RecordEntry;
use crate::error::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, Write};
use std::path::{Path, PathBuf};
use tm_core::{LogRecord, Seq};

pub const SEGMENT_EXTENSION: &str = "seg";

/// Metadata for one segment, as kept in the segment index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub id: u64,
    pub min_seq: Seq,
    /// Last record in the segment; `min_seq - 1` while empty
    pub max_seq: Seq,
    pub records: u64,
    pub bytes: u64,
    pub sealed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed_at: Option<DateTime<Utc>>,
}

impl SegmentMeta {
    pub fn new(id: u64, min_seq: Seq, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            min_seq,
            max_seq: min_seq.saturating_sub(1),
            records: 0,
            bytes: 0,
            sealed: false,
            created_at,
            sealed_at: None,
        }
    }

    pub fn file_name(id: u64) -> String {
        format!("{:020}.{}", id, SEGMENT_EXTENSION)
    }

    pub fn path(&self, dir: &Path) -> PathBuf {
        dir.join(Self::file_name(self.id))
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn contains(&self, seq: Seq) -> bool {
        !self.is_empty() && seq >= self.min_seq && seq <= self.max_seq
    }

    /// Account for one more record of `bytes` on disk
    pub fn record_appended(&mut self, seq: Seq, bytes: u64) {
        self.max_seq = seq;
        self.records += 1;
        self.bytes += bytes;
    }
}

/// Append handle for the active segment
pub struct SegmentWriter {
    id: u64,
    path: PathBuf,
    file: File,
}

impl SegmentWriter {
    /// Create a fresh segment file; fails if one already exists
    pub fn create(dir: &Path, id: u64) -> Result<Self, StorageError> {
        let path = dir.join(SegmentMeta::file_name(id));
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)?;
        crate::atomic::sync_dir(&path)?;
        Ok(Self { id, path, file })
    }

    /// Reopen an existing segment for appending after recovery
    pub fn reopen(dir: &Path, id: u64) -> Result<Self, StorageError> {
        let path = dir.join(SegmentMeta::file_name(id));
        let file = OpenOptions::new().append(true).open(&path)?;
        Ok(Self { id, path, file })
    }

    /// Write one framed record; returns the bytes written.
    ///
    /// The write is not durable until [`sync`](Self::sync) returns.
    pub fn write(&mut self, entry: &RecordEntry) -> Result<u64, StorageError> {
        let mut line = entry.to_line()?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        Ok(line.len() as u64)
    }

    pub fn sync(&mut self) -> Result<(), StorageError> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Iterator over the records of one segment file
pub struct SegmentIter {
    reader: BufReader<File>,
    segment: u64,
    line_number: u64,
    skip_until: Seq,
    /// Byte offset after the last valid record
    last_valid_position: u64,
}

impl SegmentIter {
    pub fn open(path: &Path, segment: u64, skip_until: Seq) -> Result<Self, StorageError> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::MissingSegment {
                    segment,
                    path: path.to_path_buf(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(Self {
            reader: BufReader::new(file),
            segment,
            line_number: 0,
            skip_until,
            last_valid_position: 0,
        })
    }

    pub fn last_valid_position(&self) -> u64 {
        self.last_valid_position
    }

    fn corrupted(&self, reason: impl Into<String>) -> StorageError {
        StorageError::Corrupted {
            segment: self.segment,
            line: self.line_number,
            reason: reason.into(),
        }
    }
}

impl Iterator for SegmentIter {
    type Item = Result<LogRecord, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line_number += 1;
                    // A torn final write has no newline
                    if !line.ends_with('\n') {
                        return Some(Err(self.corrupted("incomplete record")));
                    }
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let entry = match RecordEntry::from_line(trimmed) {
                        Ok(e) => e,
                        Err(e) => return Some(Err(self.corrupted(e.to_string()))),
                    };
                    if !entry.verify() {
                        return Some(Err(self.corrupted("checksum mismatch")));
                    }
                    match self.reader.stream_position() {
                        Ok(pos) => self.last_valid_position = pos,
                        Err(e) => return Some(Err(e.into())),
                    }
                    if entry.seq < self.skip_until {
                        continue;
                    }
                    return Some(Ok(entry.into_record()));
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// Result of scanning a segment file end to end
#[derive(Debug, Default)]
pub struct SegmentScan {
    pub records: u64,
    pub first_seq: Option<Seq>,
    pub last_seq: Option<Seq>,
    /// Bytes up to and including the last valid record
    pub valid_len: u64,
    pub file_len: u64,
    pub corruption: Option<String>,
}

impl SegmentScan {
    pub fn has_torn_tail(&self) -> bool {
        self.valid_len < self.file_len
    }
}

/// Read every record of a segment, stopping at the first invalid one
pub fn scan(path: &Path, segment: u64) -> Result<SegmentScan, StorageError> {
    let file_len = std::fs::metadata(path)?.len();
    let mut iter = SegmentIter::open(path, segment, Seq::ZERO)?;
    let mut result = SegmentScan {
        file_len,
        ..SegmentScan::default()
    };
    for item in iter.by_ref() {
        match item {
            Ok(record) => {
                result.records += 1;
                result.first_seq.get_or_insert(record.seq);
                result.last_seq = Some(record.seq);
            }
            Err(StorageError::Io(e)) => return Err(StorageError::Io(e)),
            Err(e) => {
                result.corruption = Some(e.to_string());
                break;
            }
        }
    }
    result.valid_len = iter.last_valid_position();
    Ok(result)
}

/// Cut a segment file back to `len` bytes
pub fn truncate(path: &Path, len: u64) -> Result<(), StorageError> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
#[path = "segment_tests.rs"]
mod tests;
