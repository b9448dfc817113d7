// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;
use tempfile::TempDir;
use tm_adapters::{FakeBaseline, FakeChannel};
use tm_core::{RecordKind, Row, RowChange, TxnMarker};
use tm_storage::StoreConfig;

struct Fixture {
    _dir: TempDir,
    store: Arc<LogStore>,
    registry: Arc<SlotRegistry>,
    channel: FakeChannel,
    baseline: FakeBaseline,
    next_id: u64,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::default().with_records_per_segment(10);
        let store = LogStore::open(dir.path().join("log"), config).unwrap();
        Self {
            _dir: dir,
            store: Arc::new(store),
            registry: Arc::new(SlotRegistry::in_memory()),
            channel: FakeChannel::new(),
            baseline: FakeBaseline::new(),
            next_id: 1,
        }
    }

    fn create_slot(&self, name: &str, kind: SlotKind) {
        self.registry
            .create(name, kind, self.store.last_seq(), Utc::now())
            .unwrap();
    }

    fn start(
        &mut self,
        slot: &str,
        config: SessionConfig,
    ) -> Result<(StreamingSession<FakeChannel, FakeBaseline>, SessionHandle), SessionError> {
        let id = SessionId::new(format!("sess-{}", self.next_id));
        self.next_id += 1;
        StreamingSession::start(
            id,
            slot,
            Arc::new(Publication::all("everything")),
            SessionDeps {
                store: Arc::clone(&self.store),
                registry: Arc::clone(&self.registry),
                channel: self.channel.clone(),
                baseline: self.baseline.clone(),
            },
            config,
            Utc::now(),
        )
    }

    fn spawn(&mut self, slot: &str, config: SessionConfig) -> SessionHandle {
        let (session, handle) = self.start(slot, config).unwrap();
        tokio::spawn(session.run());
        handle
    }

    fn data(&self, xid: u64, id: i64) -> (RecordKind, Vec<u8>) {
        let change = RowChange::insert(TxnId(xid), "orders", row(id));
        (RecordKind::Data, change.encode().unwrap())
    }

    fn marker(&self, kind: RecordKind, xid: u64) -> (RecordKind, Vec<u8>) {
        (kind, TxnMarker { xid: TxnId(xid) }.encode().unwrap())
    }

    /// Append one committed transaction with `rows` inserts; returns its commit seq
    fn commit_txn(&self, xid: u64, rows: i64) -> Seq {
        let mut records: Vec<_> = (0..rows).map(|i| self.data(xid, i)).collect();
        records.push(self.marker(RecordKind::Commit, xid));
        *self.store.append_batch(records).unwrap().last().unwrap()
    }
}

fn row(id: i64) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), json!(id));
    row
}

fn streaming_only() -> SessionConfig {
    SessionConfig::default()
        .with_initial_sync(false)
        .with_poll_interval(Duration::from_millis(20))
        .with_retry_backoff(Duration::from_millis(10), Duration::from_millis(80))
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held");
}

#[tokio::test(start_paused = true)]
async fn delivers_committed_transactions_in_commit_order() {
    let mut fx = Fixture::new();
    fx.create_slot("s1", SlotKind::Logical);
    let handle = fx.spawn("s1", streaming_only());

    let first = fx.commit_txn(1, 2);
    let second = fx.commit_txn(2, 1);
    let channel = fx.channel.clone();
    wait_until(|| channel.batches().len() == 2).await;

    assert_eq!(fx.channel.commit_seqs(), vec![first, second]);
    let batches = fx.channel.batches();
    assert_eq!(batches[0].len(), 2);
    assert!(batches[0].changes.iter().all(|c| c.commit_seq == first));
    assert_eq!(handle.state(), SessionState::Streaming);
    assert_eq!(handle.info().batches_sent, 2);
    assert_eq!(handle.info().changes_sent, 3);
}

#[tokio::test(start_paused = true)]
async fn rolled_back_work_never_reaches_the_consumer() {
    let mut fx = Fixture::new();
    fx.create_slot("s1", SlotKind::Logical);
    let handle = fx.spawn("s1", streaming_only());

    fx.store
        .append_batch(vec![
            fx.data(1, 10),
            fx.data(1, 11),
            fx.marker(RecordKind::Abort, 1),
        ])
        .unwrap();
    let committed = fx.commit_txn(2, 1);
    let channel = fx.channel.clone();
    wait_until(|| !channel.batches().is_empty()).await;

    assert_eq!(fx.channel.commit_seqs(), vec![committed]);
    assert_eq!(fx.channel.batches()[0].xid, TxnId(2));
    handle.stop().unwrap();
    assert_eq!(handle.closed().await, CloseReason::Stopped);
}

#[tokio::test(start_paused = true)]
async fn fresh_slot_gets_baseline_before_changes() {
    let mut fx = Fixture::new();
    fx.commit_txn(1, 1);
    fx.create_slot("s1", SlotKind::Logical);
    fx.baseline.add_row("orders", row(1));
    fx.baseline.add_row("orders", row(2));

    let config = streaming_only().with_initial_sync(true);
    let _handle = fx.spawn("s1", config);
    let later = fx.commit_txn(2, 1);
    let channel = fx.channel.clone();
    wait_until(|| channel.batches().len() == 2).await;

    let batches = fx.channel.batches();
    assert_eq!(batches[0].kind, BatchKind::Snapshot);
    assert_eq!(batches[0].commit_seq, Seq(2));
    assert_eq!(batches[0].len(), 2);
    assert!(batches[0]
        .changes
        .iter()
        .all(|c| c.operation == ChangeOp::Insert && c.transaction_id == TxnId::SNAPSHOT));
    assert_eq!(batches[1].commit_seq, later);
    assert_eq!(fx.baseline.snapshots(), vec![Seq(2)]);
}

#[tokio::test(start_paused = true)]
async fn baseline_failure_closes_the_session() {
    let mut fx = Fixture::new();
    fx.create_slot("s1", SlotKind::Logical);
    fx.baseline.set_unavailable(true);

    let handle = fx.spawn("s1", streaming_only().with_initial_sync(true));
    let reason = handle.closed().await;

    assert!(matches!(reason, CloseReason::Failed { kind: ErrorKind::Io, .. }));
    assert!(!fx.registry.get("s1").unwrap().is_active());
}

#[tokio::test(start_paused = true)]
async fn ack_advances_logical_slot_to_commit() {
    let mut fx = Fixture::new();
    fx.create_slot("s1", SlotKind::Logical);
    let handle = fx.spawn("s1", streaming_only());
    let commit = fx.commit_txn(1, 2);
    let channel = fx.channel.clone();
    wait_until(|| !channel.batches().is_empty()).await;

    let slot = handle.ack(commit).unwrap();
    assert_eq!((slot.restart_seq, slot.confirmed_seq), (commit, commit));
    assert_eq!(fx.registry.watermark().bound(), Some(commit));
    assert_eq!(handle.info().confirmed, commit);

    // Re-acking is harmless
    let again = handle.ack(commit).unwrap();
    assert_eq!(again.confirmed_seq, commit);
}

#[tokio::test(start_paused = true)]
async fn ack_beyond_delivery_is_rejected() {
    let mut fx = Fixture::new();
    fx.create_slot("s1", SlotKind::Logical);
    let handle = fx.spawn("s1", streaming_only());
    let commit = fx.commit_txn(1, 1);
    let channel = fx.channel.clone();
    wait_until(|| !channel.batches().is_empty()).await;

    let err = handle.ack(Seq(commit.as_u64() + 5)).unwrap_err();
    assert!(matches!(err, SessionError::AckAhead { .. }));
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(fx.registry.get("s1").unwrap().confirmed_seq, Seq::ZERO);
}

#[tokio::test(start_paused = true)]
async fn open_transaction_holds_restart_back() {
    let mut fx = Fixture::new();
    fx.create_slot("s1", SlotKind::Logical);
    let handle = fx.spawn("s1", streaming_only());

    // 1: A data, 2: B data, 3: B commit, 4: A commit
    fx.store
        .append_batch(vec![
            fx.data(1, 1),
            fx.data(2, 2),
            fx.marker(RecordKind::Commit, 2),
            fx.marker(RecordKind::Commit, 1),
        ])
        .unwrap();
    let channel = fx.channel.clone();
    wait_until(|| channel.batches().len() == 2).await;

    let slot = handle.ack(Seq(3)).unwrap();
    assert_eq!((slot.restart_seq, slot.confirmed_seq), (Seq(1), Seq(3)));
    let slot = handle.ack(Seq(4)).unwrap();
    assert_eq!((slot.restart_seq, slot.confirmed_seq), (Seq(4), Seq(4)));
}

#[tokio::test(start_paused = true)]
async fn physical_slot_keeps_lag_window() {
    let mut fx = Fixture::new();
    fx.create_slot("phys", SlotKind::Physical);
    let handle = fx.spawn("phys", streaming_only().with_physical_lag_window(3));
    fx.commit_txn(1, 4);
    let channel = fx.channel.clone();
    wait_until(|| !channel.batches().is_empty()).await;

    let slot = handle.ack(Seq(5)).unwrap();
    assert_eq!((slot.restart_seq, slot.confirmed_seq), (Seq(2), Seq(5)));
}

#[tokio::test(start_paused = true)]
async fn restarted_session_resumes_after_confirmed() {
    let mut fx = Fixture::new();
    fx.create_slot("s1", SlotKind::Logical);
    let first_commit = fx.commit_txn(1, 1);
    let second_commit = fx.commit_txn(2, 1);

    let handle = fx.spawn("s1", streaming_only());
    let channel = fx.channel.clone();
    wait_until(|| channel.batches().len() == 2).await;
    handle.ack(first_commit).unwrap();
    handle.stop().unwrap();
    handle.closed().await;

    let resumed = FakeChannel::new();
    fx.channel = resumed.clone();
    let _handle = fx.spawn("s1", streaming_only());
    wait_until(|| !resumed.batches().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(resumed.commit_seqs(), vec![second_commit]);
}

#[tokio::test(start_paused = true)]
async fn unacked_straddling_transaction_is_redelivered_whole() {
    let mut fx = Fixture::new();
    fx.create_slot("s1", SlotKind::Logical);
    fx.store
        .append_batch(vec![
            fx.data(1, 1),
            fx.data(2, 2),
            fx.marker(RecordKind::Commit, 2),
            fx.marker(RecordKind::Commit, 1),
        ])
        .unwrap();

    let handle = fx.spawn("s1", streaming_only());
    let channel = fx.channel.clone();
    wait_until(|| channel.batches().len() == 2).await;
    handle.ack(Seq(3)).unwrap();
    handle.stop().unwrap();
    handle.closed().await;

    let resumed = FakeChannel::new();
    fx.channel = resumed.clone();
    let _handle = fx.spawn("s1", streaming_only());
    wait_until(|| !resumed.batches().is_empty()).await;

    let batches = resumed.batches();
    assert_eq!(resumed.commit_seqs(), vec![Seq(4)]);
    assert_eq!(batches[0].xid, TxnId(1));
    assert_eq!(batches[0].len(), 1);
}

#[tokio::test(start_paused = true)]
async fn physical_ack_respects_open_transaction_floor() {
    let mut fx = Fixture::new();
    fx.create_slot("phys", SlotKind::Physical);
    // 1: A data, 2: B data, 3: B commit; A stays open
    fx.store
        .append_batch(vec![
            fx.data(1, 1),
            fx.data(2, 2),
            fx.marker(RecordKind::Commit, 2),
        ])
        .unwrap();

    let config = streaming_only().with_physical_lag_window(1);
    let handle = fx.spawn("phys", config.clone());
    let channel = fx.channel.clone();
    wait_until(|| !channel.batches().is_empty()).await;
    let slot = handle.ack(Seq(3)).unwrap();
    assert_eq!((slot.restart_seq, slot.confirmed_seq), (Seq(1), Seq(3)));
    handle.stop().unwrap();
    handle.closed().await;

    fx.store
        .append_batch(vec![fx.data(1, 3), fx.marker(RecordKind::Commit, 1)])
        .unwrap();
    let resumed = FakeChannel::new();
    fx.channel = resumed.clone();
    let _handle = fx.spawn("phys", config);
    wait_until(|| !resumed.batches().is_empty()).await;

    let batches = resumed.batches();
    assert_eq!(resumed.commit_seqs(), vec![Seq(5)]);
    assert_eq!(batches[0].xid, TxnId(1));
    assert_eq!(batches[0].len(), 2);
}

#[tokio::test(start_paused = true)]
async fn slot_created_inside_open_transaction_gets_it_whole() {
    let mut fx = Fixture::new();
    // 1-2: A data, 3-4: B committed before the slot exists
    fx.store
        .append_batch(vec![fx.data(7, 1), fx.data(7, 2)])
        .unwrap();
    fx.commit_txn(8, 1);
    fx.registry
        .create_with_restart("s1", SlotKind::Logical, Seq(1), Seq(4), Utc::now())
        .unwrap();
    fx.baseline.add_row("orders", row(100));

    let handle = fx.spawn("s1", streaming_only().with_initial_sync(true));
    let channel = fx.channel.clone();
    wait_until(|| channel.batches().len() == 1).await;
    fx.store
        .append_batch(vec![fx.data(7, 3), fx.marker(RecordKind::Commit, 7)])
        .unwrap();
    wait_until(|| channel.batches().len() == 2).await;

    let batches = fx.channel.batches();
    assert_eq!(batches[0].kind, BatchKind::Snapshot);
    assert_eq!((batches[0].commit_seq, batches[0].restart_floor), (Seq(4), Seq(1)));
    assert_eq!((batches[1].xid, batches[1].commit_seq), (TxnId(7), Seq(6)));
    assert_eq!(batches[1].len(), 3);

    let slot = handle.ack(Seq(6)).unwrap();
    assert_eq!((slot.restart_seq, slot.confirmed_seq), (Seq(6), Seq(6)));
}

#[tokio::test(start_paused = true)]
async fn aborted_session_task_releases_slot() {
    let mut fx = Fixture::new();
    fx.create_slot("s1", SlotKind::Logical);
    let (session, handle) = fx.start("s1", streaming_only()).unwrap();
    let task = tokio::spawn(session.run());
    wait_until(|| handle.state() == SessionState::Streaming).await;

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    assert_eq!(handle.state(), SessionState::Closed { reason: CloseReason::Stopped });
    assert_eq!(handle.closed().await, CloseReason::Stopped);
    assert!(!fx.registry.get("s1").unwrap().is_active());
    assert!(fx.start("s1", streaming_only()).is_ok());
}

#[tokio::test]
async fn unstarted_session_releases_slot_when_dropped() {
    let mut fx = Fixture::new();
    fx.create_slot("s1", SlotKind::Logical);
    let (session, handle) = fx.start("s1", streaming_only()).unwrap();
    assert!(fx.registry.get("s1").unwrap().is_active());

    drop(session);
    assert!(handle.is_closed());
    assert!(!fx.registry.get("s1").unwrap().is_active());
    assert!(format!("{:?}", handle).contains("s1"));
}

#[tokio::test]
async fn reclaimed_resume_point_is_too_far_behind() {
    let mut fx = Fixture::new();
    fx.create_slot("s1", SlotKind::Logical);
    for _ in 0..25 {
        fx.store.append(b"x".to_vec(), RecordKind::Checkpoint).unwrap();
    }
    fx.store.reclaim(Seq(21)).unwrap();

    let err = fx.start("s1", streaming_only()).err().unwrap();
    assert!(matches!(
        err,
        SessionError::SlotTooFarBehind {
            needed: Seq(1),
            oldest: Seq(21),
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::SlotTooFarBehind);
    assert!(!fx.registry.get("s1").unwrap().is_active());
}

#[tokio::test]
async fn second_session_on_held_slot_is_busy() {
    let mut fx = Fixture::new();
    fx.create_slot("s1", SlotKind::Logical);
    let (_session, _handle) = fx.start("s1", streaming_only()).unwrap();

    let err = fx.start("s1", streaming_only()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::SlotBusy);
}

#[tokio::test(start_paused = true)]
async fn backpressure_pauses_then_delivers() {
    let mut fx = Fixture::new();
    fx.create_slot("s1", SlotKind::Logical);
    fx.channel.push_failure(ChannelError::Full);
    fx.channel.push_failure(ChannelError::Io("reset".to_string()));
    let handle = fx.spawn("s1", streaming_only());

    let commit = fx.commit_txn(1, 1);
    let channel = fx.channel.clone();
    wait_until(|| !channel.batches().is_empty()).await;

    assert_eq!(fx.channel.commit_seqs(), vec![commit]);
    assert_eq!(fx.channel.attempts(), 3);
    assert_eq!(handle.info().retries, 2);
    assert_eq!(handle.state(), SessionState::Streaming);
}

#[tokio::test(start_paused = true)]
async fn consumer_hangup_closes_session() {
    let mut fx = Fixture::new();
    fx.create_slot("s1", SlotKind::Logical);
    fx.channel.close();
    let handle = fx.spawn("s1", streaming_only());
    fx.commit_txn(1, 1);

    assert_eq!(handle.closed().await, CloseReason::ConsumerGone);
    assert!(!fx.registry.get("s1").unwrap().is_active());
    assert!(matches!(handle.ack(Seq(1)), Err(SessionError::Closed(_))));
}

#[tokio::test(start_paused = true)]
async fn corrupt_record_fails_session_without_dropping_slot() {
    let mut fx = Fixture::new();
    fx.create_slot("s1", SlotKind::Logical);
    let handle = fx.spawn("s1", streaming_only());
    fx.store
        .append_batch(vec![
            (RecordKind::Data, b"{not a change".to_vec()),
            fx.marker(RecordKind::Commit, 1),
        ])
        .unwrap();

    let reason = handle.closed().await;
    assert!(matches!(
        reason,
        CloseReason::Failed {
            kind: ErrorKind::DecodeCorruption,
            ..
        }
    ));
    assert!(fx.channel.batches().is_empty());
    let slot = fx.registry.get("s1").unwrap();
    assert!(!slot.is_active());
}

#[tokio::test(start_paused = true)]
async fn explicit_pause_holds_delivery_until_resume() {
    let mut fx = Fixture::new();
    fx.create_slot("s1", SlotKind::Logical);
    let handle = fx.spawn("s1", streaming_only());
    wait_until(|| handle.state() == SessionState::Streaming).await;

    handle.pause().unwrap();
    wait_until(|| handle.state() == SessionState::Paused).await;
    let commit = fx.commit_txn(1, 1);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(fx.channel.batches().is_empty());

    handle.resume().unwrap();
    let channel = fx.channel.clone();
    wait_until(|| !channel.batches().is_empty()).await;
    assert_eq!(fx.channel.commit_seqs(), vec![commit]);
    assert_eq!(handle.state(), SessionState::Streaming);
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_tail_wait_and_releases_slot() {
    let mut fx = Fixture::new();
    fx.create_slot("s1", SlotKind::Logical);
    let handle = fx.spawn("s1", streaming_only());
    wait_until(|| fx.registry.get("s1").unwrap().is_active()).await;

    handle.stop().unwrap();
    assert_eq!(handle.closed().await, CloseReason::Stopped);
    assert!(handle.is_closed());
    assert!(!fx.registry.get("s1").unwrap().is_active());
    assert!(matches!(handle.stop(), Err(SessionError::Closed(_))));
}
