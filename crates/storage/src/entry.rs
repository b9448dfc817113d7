// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk record frame with checksum verification
//!
//! Each line of a segment file is one JSON frame holding the sequence
//! number, record kind, hex-encoded payload and a CRC32 over all three.

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use tm_core::{LogRecord, RecordKind, Seq};

/// A single framed record as written to a segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEntry {
    pub seq: Seq,
    pub kind: RecordKind,
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    /// CRC32 of seq, kind and payload
    pub crc: u32,
}

impl RecordEntry {
    /// Frame a record, computing its checksum
    pub fn new(seq: Seq, kind: RecordKind, payload: Vec<u8>) -> Self {
        let crc = Self::checksum(seq, kind, &payload);
        Self {
            seq,
            kind,
            payload,
            crc,
        }
    }

    fn checksum(seq: Seq, kind: RecordKind, payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&seq.as_u64().to_le_bytes());
        hasher.update(kind.to_string().as_bytes());
        hasher.update(payload);
        hasher.finalize()
    }

    /// Verify the checksum matches the contents
    pub fn verify(&self) -> bool {
        self.crc == Self::checksum(self.seq, self.kind, &self.payload)
    }

    /// Serialize to one line of JSON, without the trailing newline
    pub fn to_line(&self) -> Result<String, StorageError> {
        serde_json::to_string(self).map_err(StorageError::from)
    }

    pub fn from_line(line: &str) -> Result<Self, StorageError> {
        serde_json::from_str(line).map_err(StorageError::from)
    }

    pub fn into_record(self) -> LogRecord {
        LogRecord::new(self.seq, self.kind, self.payload)
    }
}

mod hex_bytes {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::fmt::Write;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let mut out = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            let _ = write!(out, "{:02x}", b);
        }
        serializer.serialize_str(&out)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.len() % 2 != 0 {
            return Err(D::Error::custom("odd-length hex payload"));
        }
        (0..s.len())
            .step_by(2)
            .map(|i| {
                s.get(i..i + 2)
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                    .ok_or_else(|| D::Error::custom("invalid hex payload"))
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "entry_tests.rs"]
mod tests;
