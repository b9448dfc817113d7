// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Consumer channel adapters
//!
//! A channel takes whole change batches. `Full` is backpressure and `Io` a
//! transient transport failure; both are retried by the session. `Closed`
//! means the consumer is gone for good.

mod mpsc;

pub use self::mpsc::MpscChannel;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeChannel;

use async_trait::async_trait;
use thiserror::Error;
use tm_core::{ChangeBatch, ErrorKind};

/// Errors from delivering a batch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("consumer is not accepting batches")]
    Full,
    #[error("channel io error: {0}")]
    Io(String),
    #[error("consumer closed the channel")]
    Closed,
}

impl ChannelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChannelError::Full => ErrorKind::ConsumerBackpressure,
            ChannelError::Io(_) | ChannelError::Closed => ErrorKind::ChannelIo,
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, ChannelError::Closed)
    }
}

/// Push side of a consumer connection
#[async_trait]
pub trait ConsumerChannel: Clone + Send + Sync + 'static {
    /// Deliver one batch; the batch is untouched on error so it can be resent
    async fn send(&self, batch: &ChangeBatch) -> Result<(), ChannelError>;
}
