// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol between `tide` and `tided`.
//!
//! Every frame is a 4-byte big-endian length followed by a JSON document.
//! A connection carries one request and one response, except `Subscribe`,
//! which turns the connection into a stream of `Changes` frames answered
//! by `Ack` frames from the client.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tm_core::{
    ChangeBatch, CloseReason, ErrorKind, Publication, RetentionSlot, RowChange, Seq, SessionId,
    SlotKind, TxnId,
};
use tm_engine::{MonitorSnapshot, SlotStatus};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Bumped on incompatible wire changes
pub const PROTOCOL_VERSION: &str = "1";

/// Per-request read/write timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest frame either side accepts
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Client to daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    Ping,
    Hello {
        version: String,
    },
    Status,

    CreateSlot {
        name: String,
        kind: SlotKind,
    },
    DropSlot {
        name: String,
    },
    ListSlots,

    CreatePublication {
        publication: Publication,
    },
    AlterPublication {
        publication: Publication,
    },
    DropPublication {
        name: String,
    },
    ListPublications,

    /// Append changes for one transaction. With `commit` the commit marker
    /// follows the changes; without it the transaction stays open for
    /// later `Append` or `Abort` requests carrying the same `xid`.
    Append {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        xid: Option<TxnId>,
        changes: Vec<RowChange>,
        #[serde(default = "default_commit")]
        commit: bool,
    },
    Abort {
        xid: TxnId,
    },

    /// Start streaming; the connection stays open until either side closes
    Subscribe {
        slot: String,
        publication: String,
    },
    /// Consumer acknowledgment; only valid on a subscription
    Ack {
        seq: Seq,
    },

    Shutdown,
}

fn default_commit() -> bool {
    true
}

/// Daemon to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Ok,
    Pong,
    Hello {
        version: String,
    },
    ShuttingDown,
    Error {
        kind: ErrorKind,
        message: String,
    },

    Status {
        uptime_secs: u64,
        snapshot: Box<MonitorSnapshot>,
    },

    Slot {
        slot: RetentionSlot,
    },
    Slots {
        slots: Vec<SlotStatus>,
    },

    Publication {
        publication: Publication,
    },
    Publications {
        publications: Vec<Publication>,
    },

    Appended {
        xid: TxnId,
        /// Commit marker when committed, else the last change written
        seq: Seq,
        committed: bool,
    },
    Aborted {
        xid: TxnId,
        seq: Seq,
    },

    Subscribed {
        session: SessionId,
    },
    Changes {
        batch: ChangeBatch,
    },
    Closed {
        reason: CloseReason,
    },
}

impl Response {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Response::Error {
            kind,
            message: message.into(),
        }
    }
}

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame of {0} bytes exceeds the 16 MiB limit")]
    FrameTooLarge(usize),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout")]
    Timeout,
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Json(_) | ProtocolError::FrameTooLarge(_) => {
                ErrorKind::InvalidArgument
            }
            ProtocolError::Io(_) | ProtocolError::ConnectionClosed | ProtocolError::Timeout => {
                ErrorKind::Io
            }
        }
    }
}

/// Serialize a message to JSON (no length prefix)
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(msg)?)
}

/// Deserialize a message from JSON
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Read one length-prefixed frame
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge(len));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write one length-prefixed frame
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), ProtocolError> {
    if data.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }
    let len = data.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a request with a timeout
pub async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut R,
    timeout: Duration,
) -> Result<Request, ProtocolError> {
    let bytes = tokio::time::timeout(timeout, read_message(reader))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    decode(&bytes)
}

/// Write a response with a timeout
pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Response,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    let data = encode(response)?;
    tokio::time::timeout(timeout, write_message(writer, &data))
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
