// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request handling and subscription streaming tests

use super::*;
use crate::protocol::{ProtocolError, Response};
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use tm_adapters::{NoOpBaseline, NoOpScanner};
use tm_core::{
    ChangeOp, CloseReason, EntityFilter, OperationMask, Publication, Row, RowChange, Seq,
    SlotKind, SystemClock, TxnId, UuidIdGen,
};
use tm_engine::{Runtime, RuntimeConfig, RuntimeDeps, SessionConfig};
use tm_storage::{LogStore, PublicationCatalog, SlotRegistry, StoreConfig};

fn context(dir: &TempDir) -> ServerContext {
    let store = LogStore::open(dir.path().join("log"), StoreConfig::default()).unwrap();
    let session = SessionConfig::default()
        .with_initial_sync(false)
        .with_poll_interval(Duration::from_millis(10));
    let runtime = Runtime::new(
        RuntimeDeps {
            store: Arc::new(store),
            registry: Arc::new(SlotRegistry::open(dir.path()).unwrap()),
            publications: Arc::new(PublicationCatalog::open(dir.path()).unwrap()),
            scanner: NoOpScanner,
            baseline: NoOpBaseline,
        },
        RuntimeConfig::default().with_session(session),
        SystemClock,
        UuidIdGen,
    );
    ServerContext::new(runtime).0
}

fn row(id: i64) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), json!(id));
    row
}

fn append(changes: Vec<RowChange>) -> Request {
    Request::Append {
        xid: None,
        changes,
        commit: true,
    }
}

fn expect_error(response: Response, expected: ErrorKind) {
    match response {
        Response::Error { kind, .. } => assert_eq!(kind, expected),
        other => panic!("expected {} error, got {:?}", expected, other),
    }
}

#[tokio::test]
async fn ping_and_hello() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);

    assert_eq!(handle_request(&ctx, Request::Ping).await, Response::Pong);
    let hello = Request::Hello {
        version: PROTOCOL_VERSION.to_string(),
    };
    assert_eq!(
        handle_request(&ctx, hello).await,
        Response::Hello {
            version: PROTOCOL_VERSION.to_string()
        }
    );
    let stale = Request::Hello {
        version: "0".to_string(),
    };
    expect_error(handle_request(&ctx, stale).await, ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn slot_requests_report_stable_error_kinds() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let create = Request::CreateSlot {
        name: "s1".to_string(),
        kind: SlotKind::Logical,
    };

    match handle_request(&ctx, create.clone()).await {
        Response::Slot { slot } => assert_eq!(slot.name, "s1"),
        other => panic!("unexpected response: {:?}", other),
    }
    expect_error(handle_request(&ctx, create).await, ErrorKind::DuplicateSlot);

    match handle_request(&ctx, Request::ListSlots).await {
        Response::Slots { slots } => {
            assert_eq!(slots.len(), 1);
            assert!(!slots[0].active);
        }
        other => panic!("unexpected response: {:?}", other),
    }

    let drop = Request::DropSlot {
        name: "s1".to_string(),
    };
    assert!(matches!(
        handle_request(&ctx, drop.clone()).await,
        Response::Slot { .. }
    ));
    expect_error(handle_request(&ctx, drop).await, ErrorKind::SlotNotFound);
}

#[tokio::test]
async fn publications_can_be_redefined_and_dropped() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let orders = Publication::new(
        "orders",
        EntityFilter::only(["orders"]),
        OperationMask::all(),
    );

    handle_request(
        &ctx,
        Request::CreatePublication {
            publication: orders.clone(),
        },
    )
    .await;
    let narrowed = Publication::new(
        "orders",
        EntityFilter::only(["orders"]),
        OperationMask::of([ChangeOp::Insert]),
    );
    assert_eq!(
        handle_request(
            &ctx,
            Request::AlterPublication {
                publication: narrowed.clone()
            }
        )
        .await,
        Response::Publication {
            publication: narrowed.clone()
        }
    );
    assert_eq!(
        handle_request(&ctx, Request::ListPublications).await,
        Response::Publications {
            publications: vec![narrowed]
        }
    );

    let drop = Request::DropPublication {
        name: "orders".to_string(),
    };
    assert_eq!(handle_request(&ctx, drop.clone()).await, Response::Ok);
    expect_error(
        handle_request(&ctx, drop).await,
        ErrorKind::PublicationNotFound,
    );
}

#[tokio::test]
async fn append_open_then_abort() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);

    let committed = handle_request(
        &ctx,
        append(vec![RowChange::insert(TxnId(0), "orders", row(1))]),
    )
    .await;
    assert!(matches!(
        committed,
        Response::Appended {
            seq: Seq(2),
            committed: true,
            ..
        }
    ));

    let open = Request::Append {
        xid: Some(TxnId(900)),
        changes: vec![RowChange::insert(TxnId(0), "orders", row(2))],
        commit: false,
    };
    assert_eq!(
        handle_request(&ctx, open).await,
        Response::Appended {
            xid: TxnId(900),
            seq: Seq(3),
            committed: false
        }
    );
    assert_eq!(
        handle_request(&ctx, Request::Abort { xid: TxnId(900) }).await,
        Response::Aborted {
            xid: TxnId(900),
            seq: Seq(4)
        }
    );

    let mut missing_identity = RowChange::update(TxnId(0), "orders", row(1), row(3));
    missing_identity.before = None;
    expect_error(
        handle_request(&ctx, append(vec![missing_identity])).await,
        ErrorKind::InvalidArgument,
    );
}

#[tokio::test]
async fn stray_ack_and_shutdown() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);

    expect_error(
        handle_request(&ctx, Request::Ack { seq: Seq(1) }).await,
        ErrorKind::InvalidArgument,
    );
    assert!(!ctx.shutdown_requested());
    assert_eq!(
        handle_request(&ctx, Request::Shutdown).await,
        Response::ShuttingDown
    );
    assert!(ctx.shutdown_requested());
}

// -- subscriptions over a socket pair --

async fn send(stream: &mut UnixStream, request: &Request) {
    let data = protocol::encode(request).unwrap();
    protocol::write_message(stream, &data).await.unwrap();
}

async fn recv(stream: &mut UnixStream) -> Result<Response, ProtocolError> {
    let bytes = tokio::time::timeout(Duration::from_secs(5), protocol::read_message(stream))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    protocol::decode(&bytes)
}

async fn wait_for_confirmed(ctx: &ServerContext, slot: &str, seq: Seq) {
    for _ in 0..200 {
        if ctx.runtime.registry().get(slot).map(|s| s.confirmed_seq) == Some(seq) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("slot {} never confirmed {}", slot, seq);
}

async fn wait_for_release(ctx: &ServerContext, slot: &str) {
    for _ in 0..200 {
        if ctx.runtime.registry().get(slot).is_some_and(|s| !s.is_active()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("slot {} was never released", slot);
}

#[tokio::test]
async fn subscription_streams_changes_and_applies_acks() {
    let dir = TempDir::new().unwrap();
    let ctx = Arc::new(context(&dir));
    ctx.runtime.create_slot("s1", SlotKind::Logical).unwrap();
    ctx.runtime
        .create_publication(Publication::all("all"))
        .unwrap();

    let (mut client, server) = UnixStream::pair().unwrap();
    let task = tokio::spawn(handle_connection(Arc::clone(&ctx), server));
    send(
        &mut client,
        &Request::Subscribe {
            slot: "s1".to_string(),
            publication: "all".to_string(),
        },
    )
    .await;
    assert!(matches!(
        recv(&mut client).await.unwrap(),
        Response::Subscribed { .. }
    ));

    let (_, commit) = ctx
        .runtime
        .append_transaction(None, vec![RowChange::insert(TxnId(0), "orders", row(1))])
        .unwrap();
    let batch = match recv(&mut client).await.unwrap() {
        Response::Changes { batch } => batch,
        other => panic!("unexpected frame: {:?}", other),
    };
    assert_eq!(batch.commit_seq, commit);
    assert_eq!(batch.changes[0].after_image, Some(row(1)));

    send(&mut client, &Request::Ack { seq: commit }).await;
    wait_for_confirmed(&ctx, "s1", commit).await;

    send(&mut client, &Request::Ack { seq: Seq(99) }).await;
    match recv(&mut client).await.unwrap() {
        Response::Error { kind, .. } => assert_eq!(kind, ErrorKind::InvalidArgument),
        other => panic!("unexpected frame: {:?}", other),
    }

    drop(client);
    task.await.unwrap().unwrap();
    wait_for_release(&ctx, "s1").await;
}

#[tokio::test]
async fn stopping_the_runtime_closes_subscriptions() {
    let dir = TempDir::new().unwrap();
    let ctx = Arc::new(context(&dir));
    ctx.runtime.create_slot("s1", SlotKind::Physical).unwrap();
    ctx.runtime
        .create_publication(Publication::all("all"))
        .unwrap();

    let (mut client, server) = UnixStream::pair().unwrap();
    let task = tokio::spawn(handle_connection(Arc::clone(&ctx), server));
    send(
        &mut client,
        &Request::Subscribe {
            slot: "s1".to_string(),
            publication: "all".to_string(),
        },
    )
    .await;
    assert!(matches!(
        recv(&mut client).await.unwrap(),
        Response::Subscribed { .. }
    ));

    assert_eq!(ctx.runtime.stop_sessions().await, 1);
    assert_eq!(
        recv(&mut client).await.unwrap(),
        Response::Closed {
            reason: CloseReason::Stopped
        }
    );
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn busy_slot_refuses_a_second_subscriber() {
    let dir = TempDir::new().unwrap();
    let ctx = Arc::new(context(&dir));
    ctx.runtime.create_slot("s1", SlotKind::Logical).unwrap();
    ctx.runtime
        .create_publication(Publication::all("all"))
        .unwrap();
    let (_held, _rx) = ctx.runtime.subscribe("s1", "all").unwrap();

    let (mut client, server) = UnixStream::pair().unwrap();
    let task = tokio::spawn(handle_connection(Arc::clone(&ctx), server));
    send(
        &mut client,
        &Request::Subscribe {
            slot: "s1".to_string(),
            publication: "all".to_string(),
        },
    )
    .await;
    expect_error(recv(&mut client).await.unwrap(), ErrorKind::SlotBusy);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn ending_a_pruned_subscription_is_quiet() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    ctx.runtime.create_publication(Publication::all("all")).unwrap();
    ctx.runtime.create_slot("a", SlotKind::Logical).unwrap();
    ctx.runtime.create_slot("b", SlotKind::Logical).unwrap();

    let (first, _rx_a) = ctx.runtime.subscribe("a", "all").unwrap();
    first.stop().unwrap();
    first.closed().await;
    // Starting another session prunes the closed one
    let (second, _rx_b) = ctx.runtime.subscribe("b", "all").unwrap();

    assert_eq!(end_subscription(&ctx, first.id()).await, None);
    assert_eq!(
        end_subscription(&ctx, second.id()).await,
        Some(CloseReason::Stopped)
    );
    assert!(ctx.runtime.list_slots().iter().all(|s| !s.is_active()));
}
