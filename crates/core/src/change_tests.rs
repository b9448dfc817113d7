// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;
use yare::parameterized;

fn row(id: i64) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), json!(id));
    row
}

#[test]
fn row_change_payload_omits_absent_images() {
    let change = RowChange::insert(TxnId(9), "users", row(1));
    let bytes = change.encode().unwrap();
    let text = String::from_utf8(bytes.clone()).unwrap();
    assert!(!text.contains("before"));
    assert!(!text.contains("origin"));
    assert_eq!(RowChange::decode(&bytes).unwrap(), change);
}

#[test]
fn row_change_keeps_origin() {
    let change = RowChange::delete(TxnId(2), "users", row(5)).with_origin("node-b");
    let decoded = RowChange::decode(&change.encode().unwrap()).unwrap();
    assert_eq!(decoded.origin.as_deref(), Some("node-b"));
    assert_eq!(decoded.op, ChangeOp::Delete);
}

#[test]
fn garbage_payload_fails_to_decode() {
    assert!(RowChange::decode(b"not json").is_err());
    assert!(TxnMarker::decode(b"{\"nope\":1}").is_err());
}

#[parameterized(
    insert = { "insert", ChangeOp::Insert },
    update = { "UPDATE", ChangeOp::Update },
    delete = { " delete ", ChangeOp::Delete },
    truncate = { "Truncate", ChangeOp::Truncate },
)]
fn change_op_parses(input: &str, expected: ChangeOp) {
    assert_eq!(input.parse::<ChangeOp>().unwrap(), expected);
}

#[test]
fn change_op_rejects_unknown() {
    assert!("upsert".parse::<ChangeOp>().is_err());
}

#[test]
fn only_update_and_delete_require_identity() {
    let needing: Vec<_> = ChangeOp::ALL
        .iter()
        .filter(|op| op.requires_identity())
        .collect();
    assert_eq!(needing, vec![&ChangeOp::Update, &ChangeOp::Delete]);
}
