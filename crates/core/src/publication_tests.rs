// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn all_publication_publishes_everything() {
    let publication = Publication::all("everything");
    for op in ChangeOp::ALL {
        assert!(publication.publishes("anything", op));
    }
}

#[test]
fn entity_filter_restricts_entities() {
    let publication = Publication::new(
        "orders_only",
        EntityFilter::only(["orders"]),
        OperationMask::all(),
    );
    assert!(publication.publishes("orders", ChangeOp::Insert));
    assert!(!publication.publishes("users", ChangeOp::Insert));
}

#[test]
fn operation_mask_restricts_operations() {
    let publication = Publication::new(
        "inserts",
        EntityFilter::All,
        OperationMask::of([ChangeOp::Insert]),
    );
    assert!(publication.publishes("users", ChangeOp::Insert));
    assert!(!publication.publishes("users", ChangeOp::Delete));
    assert!(!publication.publishes("users", ChangeOp::Truncate));
}

#[test]
fn publication_serializes_filter_with_tag() {
    let publication = Publication::new(
        "p",
        EntityFilter::only(["a", "b"]),
        OperationMask::of([ChangeOp::Update, ChangeOp::Insert]),
    );
    let json = serde_json::to_value(&publication).unwrap();
    assert_eq!(json["entities"]["type"], "only");
    assert_eq!(json["operations"], serde_json::json!(["insert", "update"]));

    let back: Publication = serde_json::from_value(json).unwrap();
    assert_eq!(back, publication);
}
