// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Behavioral scenarios across the storage and engine crates.
//!
//! Each test drives real on-disk stores in a temp directory; nothing here
//! reaches into crate internals.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use proptest::prelude::*;
use serde_json::json;
use similar_asserts::assert_eq;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tm_adapters::{NoOpBaseline, NoOpScanner};
use tm_core::{
    BatchKind, ErrorKind, FakeClock, HolderId, LogRecord, Publication, RecordKind, Row, RowChange,
    Seq, SequentialIdGen, SlotKind, TxnId, TxnMarker, Watermark,
};
use tm_engine::{
    CostConfig, CostLimiter, Decoder, DecoderConfig, Runtime, RuntimeConfig, RuntimeDeps,
    SessionConfig,
};
use tm_storage::{LogStore, PublicationCatalog, SlotRegistry, StoreConfig};

fn store_config(records_per_segment: u64) -> StoreConfig {
    StoreConfig::default()
        .with_records_per_segment(records_per_segment)
        .with_sync_on_append(false)
}

fn open_store(dir: &Path, records_per_segment: u64) -> LogStore {
    LogStore::open(dir.join("log"), store_config(records_per_segment)).unwrap()
}

fn fill(store: &LogStore, count: u64) {
    for i in 0..count {
        store
            .append(format!("record-{i}").into_bytes(), RecordKind::Data)
            .unwrap();
    }
}

fn read_all(store: &LogStore, from: Seq) -> Vec<LogRecord> {
    store.read(from).unwrap().map(|r| r.unwrap()).collect()
}

fn row(id: i64) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), json!(id));
    row
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn reads_return_every_record_from_the_start_point(
        batches in prop::collection::vec(1usize..6, 1..12),
        per_segment in 1u64..8,
        from in 0u64..60,
    ) {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path(), per_segment);
        for size in &batches {
            let records = (0..*size)
                .map(|i| (RecordKind::Data, format!("r{i}").into_bytes()))
                .collect();
            store.append_batch(records).unwrap();
        }

        let last = store.last_seq().as_u64();
        let seqs: Vec<u64> = read_all(&store, Seq(from)).iter().map(|r| r.seq.as_u64()).collect();
        let expected: Vec<u64> = (from.max(1)..=last).collect();
        prop_assert_eq!(seqs, expected);
    }

    #[test]
    fn reclaim_keeps_every_segment_the_watermark_needs(
        total in 1u64..80,
        per_segment in 1u64..10,
        restarts in prop::collection::vec(0u64..80, 1..4),
    ) {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path(), per_segment);
        let registry = SlotRegistry::open(dir.path()).unwrap();
        fill(&store, total);

        for (i, restart) in restarts.iter().enumerate() {
            let restart = Seq((*restart).min(total));
            let name = format!("s{i}");
            registry.create(&name, SlotKind::Logical, Seq::ZERO, chrono::Utc::now()).unwrap();
            registry.advance(&name, restart, restart).unwrap();
        }

        let watermark = registry.watermark().bound().unwrap();
        let before = store.segments();
        store.reclaim(watermark).unwrap();
        let after = store.segments();

        for seg in &before {
            if seg.max_seq >= watermark {
                prop_assert!(after.iter().any(|s| s.id == seg.id), "segment {} reclaimed", seg.id);
            }
        }
        let seqs: Vec<u64> = read_all(&store, watermark).iter().map(|r| r.seq.as_u64()).collect();
        prop_assert_eq!(seqs, (watermark.as_u64().max(1)..=total).collect::<Vec<_>>());
    }
}

#[test]
fn backwards_advance_fails_and_leaves_the_slot_alone() {
    let registry = SlotRegistry::in_memory();
    registry
        .create("s1", SlotKind::Logical, Seq::ZERO, chrono::Utc::now())
        .unwrap();
    registry.advance("s1", Seq(10), Seq(12)).unwrap();

    let err = registry.advance("s1", Seq(9), Seq(20)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NonMonotonicAdvance);
    let slot = registry.get("s1").unwrap();
    assert_eq!((slot.restart_seq, slot.confirmed_seq), (Seq(10), Seq(12)));
}

#[test]
fn aborted_transactions_decode_to_nothing_and_committed_ones_to_one_batch() {
    let changes = [
        RowChange::insert(TxnId(5), "orders", row(1)),
        RowChange::update(TxnId(5), "orders", row(1), row(2)),
    ];
    let records = |end: RecordKind| {
        let mut records: Vec<LogRecord> = changes
            .iter()
            .enumerate()
            .map(|(i, c)| LogRecord::new(Seq(i as u64 + 1), RecordKind::Data, c.encode().unwrap()))
            .collect();
        let marker = TxnMarker { xid: TxnId(5) }.encode().unwrap();
        records.push(LogRecord::new(Seq(3), end, marker));
        records
    };
    let decode = |records: Vec<LogRecord>| {
        let mut decoder = Decoder::new(Arc::new(Publication::all("all")), DecoderConfig::default());
        records
            .iter()
            .filter_map(|r| decoder.decode(r).unwrap())
            .collect::<Vec<_>>()
    };

    assert!(decode(records(RecordKind::Abort)).is_empty());

    let batches = decode(records(RecordKind::Commit));
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].kind, BatchKind::Transaction);
    assert_eq!(batches[0].commit_seq, Seq(3));
    let images: Vec<Option<Row>> = batches[0].changes.iter().map(|c| c.after_image.clone()).collect();
    assert_eq!(images, vec![Some(row(1)), Some(row(2))]);
}

#[test]
fn reopening_reproduces_records_and_durable_slot_positions() {
    let dir = TempDir::new().unwrap();
    let (written, slot) = {
        let store = open_store(dir.path(), 7);
        let registry = SlotRegistry::open(dir.path()).unwrap();
        registry
            .create("s1", SlotKind::Physical, Seq::ZERO, chrono::Utc::now())
            .unwrap();
        fill(&store, 30);
        let slot = registry.advance("s1", Seq(12), Seq(15)).unwrap();
        (read_all(&store, Seq::ZERO), slot)
    };

    let store = open_store(dir.path(), 7);
    let registry = SlotRegistry::open(dir.path()).unwrap();
    assert_eq!(read_all(&store, Seq::ZERO), written);
    assert_eq!(written.len(), 30);
    let reopened = registry.get("s1").unwrap();
    assert_eq!(
        (reopened.restart_seq, reopened.confirmed_seq),
        (slot.restart_seq, slot.confirmed_seq)
    );
    assert_eq!(registry.watermark(), Watermark::Bounded(Seq(12)));
}

#[test]
fn unadvanced_slot_pins_the_log_until_it_moves() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path(), 10);
    let registry = SlotRegistry::open(dir.path()).unwrap();
    registry
        .create("s1", SlotKind::Logical, Seq::ZERO, chrono::Utc::now())
        .unwrap();
    fill(&store, 100);

    let below = registry.watermark().bound().unwrap();
    assert_eq!(below, Seq::ZERO);
    assert!(store.reclaim(below).unwrap().is_empty());
    assert_eq!(store.segments().len(), 10);

    registry.advance("s1", Seq(50), Seq(50)).unwrap();
    let report = store.reclaim(registry.watermark().bound().unwrap()).unwrap();
    assert_eq!(report.segments.len(), 4);
    assert_eq!(report.oldest_seq, Seq(41));
    assert!(store.segments().iter().all(|s| s.max_seq >= Seq(50)));
}

#[tokio::test(start_paused = true)]
async fn cost_limiter_sleeps_once_over_ten_charges() {
    let mut limiter = CostLimiter::new(CostConfig::new(100, Duration::from_millis(10)));
    let mut sleeps = Vec::new();
    for call in 1..=10 {
        if limiter.charge(15).await {
            sleeps.push(call);
        }
    }
    assert_eq!(sleeps, vec![7]);
    assert_eq!(limiter.sleeps(), 1);
    assert_eq!(limiter.accumulated(), 45);
}

#[test]
fn a_slot_serves_one_session_at_a_time() {
    let registry = SlotRegistry::in_memory();
    registry
        .create("s1", SlotKind::Logical, Seq::ZERO, chrono::Utc::now())
        .unwrap();
    let a = HolderId::new("sessionA");
    let b = HolderId::new("sessionB");

    registry.acquire("s1", &a).unwrap();
    let err = registry.acquire("s1", &b).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SlotBusy);

    registry.release("s1", &a).unwrap();
    assert!(registry.acquire("s1", &b).unwrap().is_held_by(&b));
}

#[tokio::test]
async fn acknowledged_changes_become_reclaimable() {
    let dir = TempDir::new().unwrap();
    let runtime = Runtime::new(
        RuntimeDeps {
            store: Arc::new(open_store(dir.path(), 4)),
            registry: Arc::new(SlotRegistry::open(dir.path()).unwrap()),
            publications: Arc::new(PublicationCatalog::open(dir.path()).unwrap()),
            scanner: NoOpScanner,
            baseline: NoOpBaseline,
        },
        RuntimeConfig::default()
            .with_session(SessionConfig::default().with_poll_interval(Duration::from_millis(10))),
        FakeClock::new(),
        SequentialIdGen::new("sess"),
    );
    runtime.create_slot("s1", SlotKind::Logical).unwrap();
    runtime.create_publication(Publication::all("all")).unwrap();

    let mut last_commit = Seq::ZERO;
    for id in 0..10 {
        let (_, commit) = runtime
            .append_transaction(None, vec![RowChange::insert(TxnId(0), "orders", row(id))])
            .unwrap();
        last_commit = commit;
    }
    assert_eq!(last_commit, Seq(20));

    let (session, mut rx) = runtime.subscribe("s1", "all").unwrap();
    let mut commits = Vec::new();
    while commits.len() < 10 {
        let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        if batch.kind == BatchKind::Transaction {
            commits.push(batch.commit_seq.as_u64());
        }
    }
    assert_eq!(commits, (1..=10).map(|i| i * 2).collect::<Vec<_>>());

    let pass = runtime.run_maintenance_pass().await.unwrap();
    assert_eq!(pass.reclaimed_segments, 0, "nothing acknowledged yet");

    runtime.advance_ack(session.id(), last_commit).unwrap();
    let pass = runtime.run_maintenance_pass().await.unwrap();
    assert_eq!(pass.watermark, Watermark::Bounded(last_commit));
    assert_eq!(pass.reclaimed_segments, 4);
    assert_eq!(runtime.store().oldest_seq(), Seq(17));

    assert_eq!(runtime.stop_sessions().await, 1);
    runtime.shutdown().await.unwrap();
}
