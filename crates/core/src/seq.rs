// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log positions and retention watermarks

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Position of a record in the log.
///
/// Sequences are assigned by the log store starting at 1, strictly
/// increasing without gaps, and never reused. `Seq::ZERO` means "before the
/// first record" and is the starting point of a freshly created slot.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Seq(pub u64);

impl Seq {
    pub const ZERO: Seq = Seq(0);
    pub const MAX: Seq = Seq(u64::MAX);

    pub const fn new(value: u64) -> Self {
        Seq(value)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The position immediately after this one
    pub const fn next(self) -> Seq {
        Seq(self.0.saturating_add(1))
    }

    /// Number of positions from `other` up to `self` (0 if `other` is ahead)
    pub const fn distance_from(self, other: Seq) -> u64 {
        self.0.saturating_sub(other.0)
    }

    /// Step back by `n` positions, stopping at zero
    pub const fn saturating_sub(self, n: u64) -> Seq {
        Seq(self.0.saturating_sub(n))
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Seq {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Seq)
    }
}

impl From<u64> for Seq {
    fn from(value: u64) -> Self {
        Seq(value)
    }
}

/// Global retention watermark across all slots.
///
/// `Bounded(seq)` means no record after `seq` may be reclaimed; `Unbounded`
/// means no slot exists, so only configured retention limits apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "seq", rename_all = "snake_case")]
pub enum Watermark {
    Bounded(Seq),
    Unbounded,
}

impl Watermark {
    /// Minimum of an iterator of restart positions; `Unbounded` when empty
    pub fn min_of(restarts: impl IntoIterator<Item = Seq>) -> Self {
        restarts
            .into_iter()
            .min()
            .map_or(Watermark::Unbounded, Watermark::Bounded)
    }

    pub fn bound(&self) -> Option<Seq> {
        match self {
            Watermark::Bounded(seq) => Some(*seq),
            Watermark::Unbounded => None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Watermark::Unbounded)
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Bounded(seq) => write!(f, "{}", seq),
            Watermark::Unbounded => write!(f, "unbounded"),
        }
    }
}

#[cfg(test)]
#[path = "seq_tests.rs"]
mod tests;
