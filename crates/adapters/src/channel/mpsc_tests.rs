// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tm_core::{BatchKind, Seq, TxnId};

fn batch(commit: u64) -> ChangeBatch {
    ChangeBatch {
        kind: BatchKind::Transaction,
        xid: TxnId(commit),
        commit_seq: Seq(commit),
        restart_floor: Seq(commit),
        changes: Vec::new(),
    }
}

#[tokio::test]
async fn full_queue_reports_backpressure() {
    let (channel, mut rx) = MpscChannel::pair(1);
    channel.send(&batch(1)).await.unwrap();
    assert_eq!(channel.send(&batch(2)).await, Err(ChannelError::Full));

    assert_eq!(rx.recv().await.unwrap().commit_seq, Seq(1));
    channel.send(&batch(2)).await.unwrap();
    assert_eq!(rx.recv().await.unwrap().commit_seq, Seq(2));
}

#[tokio::test]
async fn dropped_receiver_closes_channel() {
    let (channel, rx) = MpscChannel::pair(4);
    drop(rx);
    assert!(channel.is_closed());
    let err = channel.send(&batch(1)).await.unwrap_err();
    assert_eq!(err, ChannelError::Closed);
    assert!(!err.is_retryable());
}
