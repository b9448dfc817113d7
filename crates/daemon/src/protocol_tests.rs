// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol unit tests

use super::*;
use serde_json::json;
use tm_core::{BatchKind, ChangeOp, DecodedChange, EntityFilter, OperationMask, Row};

fn row(id: i64) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), json!(id));
    row
}

#[test]
fn append_request_survives_the_wire() {
    let request = Request::Append {
        xid: Some(TxnId(42)),
        changes: vec![
            RowChange::insert(TxnId(42), "orders", row(1)),
            RowChange::delete(TxnId(42), "orders", row(0)),
        ],
        commit: true,
    };

    let encoded = encode(&request).expect("encode failed");
    let decoded: Request = decode(&encoded).expect("decode failed");

    assert_eq!(request, decoded);
}

#[test]
fn append_commits_unless_told_otherwise() {
    let decoded: Request =
        decode(br#"{"type":"Append","changes":[]}"#).expect("decode failed");
    assert_eq!(
        decoded,
        Request::Append {
            xid: None,
            changes: vec![],
            commit: true,
        }
    );
}

#[test]
fn publication_request_carries_filters() {
    let request = Request::CreatePublication {
        publication: Publication::new(
            "orders",
            EntityFilter::only(["orders", "order_lines"]),
            OperationMask::of([ChangeOp::Insert, ChangeOp::Update]),
        ),
    };

    let encoded = encode(&request).expect("encode failed");
    let decoded: Request = decode(&encoded).expect("decode failed");

    assert_eq!(request, decoded);
}

#[test]
fn error_response_uses_stable_kind_names() {
    let response = Response::error(ErrorKind::SlotBusy, "slot s1 is held by sess-1");
    let encoded = encode(&response).expect("encode failed");
    let json_str = std::str::from_utf8(&encoded).expect("should be valid UTF-8");

    assert!(json_str.contains("\"kind\":\"slot_busy\""), "{}", json_str);
    let decoded: Response = decode(&encoded).expect("decode failed");
    assert_eq!(decoded, response);
}

#[test]
fn changes_frame_carries_the_whole_batch() {
    let batch = ChangeBatch {
        kind: BatchKind::Transaction,
        xid: TxnId(7),
        commit_seq: Seq(12),
        restart_floor: Seq(9),
        changes: vec![DecodedChange {
            entity: "orders".to_string(),
            operation: ChangeOp::Insert,
            before_image: None,
            after_image: Some(row(3)),
            commit_seq: Seq(12),
            transaction_id: TxnId(7),
            origin: None,
        }],
    };
    let response = Response::Changes { batch };

    let encoded = encode(&response).expect("encode failed");
    let decoded: Response = decode(&encoded).expect("decode failed");

    assert_eq!(response, decoded);
}

#[test]
fn unknown_request_type_is_rejected() {
    let err = decode::<Request>(br#"{"type":"Vacuum"}"#).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn encode_returns_json_without_length_prefix() {
    let response = Response::Ok;
    let encoded = encode(&response).expect("encode failed");

    // encode() returns raw JSON, no length prefix
    let json_str = std::str::from_utf8(&encoded).expect("should be valid UTF-8");
    assert!(
        json_str.starts_with('{'),
        "should be JSON object: {}",
        json_str
    );
}

#[tokio::test]
async fn read_write_message_roundtrip() {
    let original = b"hello world";

    let mut buffer = Vec::new();
    write_message(&mut buffer, original)
        .await
        .expect("write failed");

    // write_message adds 4-byte length prefix
    assert_eq!(buffer.len(), 4 + original.len());

    let mut cursor = std::io::Cursor::new(buffer);
    let read_back = read_message(&mut cursor).await.expect("read failed");

    assert_eq!(read_back, original);
}

#[tokio::test]
async fn write_message_adds_length_prefix() {
    let data = b"test data";

    let mut buffer = Vec::new();
    write_message(&mut buffer, data)
        .await
        .expect("write failed");

    let len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;

    assert_eq!(len, data.len());
    assert_eq!(&buffer[4..], data);
}

#[tokio::test]
async fn empty_stream_reads_as_closed_connection() {
    let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
    let err = read_message(&mut cursor).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
}

#[tokio::test]
async fn oversized_frame_header_is_refused() {
    let len = (MAX_FRAME_BYTES as u32 + 1).to_be_bytes();
    let mut cursor = std::io::Cursor::new(len.to_vec());
    let err = read_message(&mut cursor).await.unwrap_err();
    assert!(matches!(err, ProtocolError::FrameTooLarge(_)));
}

#[tokio::test]
async fn request_read_times_out_on_silent_peer() {
    let (mut client, _server) = tokio::io::duplex(64);
    let err = read_request(&mut client, Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Timeout));
}
