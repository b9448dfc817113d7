// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process consumer channel over a bounded tokio mpsc queue.

use super::{ChannelError, ConsumerChannel};
use async_trait::async_trait;
use tm_core::ChangeBatch;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Bounded queue to an in-process consumer (e.g. a protocol connection)
#[derive(Clone, Debug)]
pub struct MpscChannel {
    tx: mpsc::Sender<ChangeBatch>,
}

impl MpscChannel {
    /// Channel holding at most `capacity` undelivered batches
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<ChangeBatch>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl ConsumerChannel for MpscChannel {
    async fn send(&self, batch: &ChangeBatch) -> Result<(), ChannelError> {
        match self.tx.try_send(batch.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ChannelError::Full),
            Err(TrySendError::Closed(_)) => Err(ChannelError::Closed),
        }
    }
}

#[cfg(test)]
#[path = "mpsc_tests.rs"]
mod tests;
