// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session identifier generation

use crate::session::SessionId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hands out identifiers for streaming sessions
pub trait IdGen: Clone + Send + Sync + 'static {
    fn session_id(&self) -> SessionId;
}

/// Random identifiers for production use
#[derive(Clone, Debug, Default)]
pub struct UuidIdGen;

impl IdGen for UuidIdGen {
    fn session_id(&self) -> SessionId {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        SessionId(format!("sess-{}", &uuid[..12]))
    }
}

/// Predictable identifiers for tests
#[derive(Clone, Debug)]
pub struct SequentialIdGen {
    prefix: String,
    counter: Arc<AtomicU64>,
}

impl SequentialIdGen {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Default for SequentialIdGen {
    fn default() -> Self {
        Self::new("sess")
    }
}

impl IdGen for SequentialIdGen {
    fn session_id(&self) -> SessionId {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        SessionId(format!("{}-{}", self.prefix, n))
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
