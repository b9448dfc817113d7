// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn line_round_trip_preserves_payload() {
    let entry = RecordEntry::new(Seq(7), RecordKind::Data, vec![0, 1, 0xab, 0xff]);
    let line = entry.to_line().unwrap();
    assert!(!line.contains('\n'));
    assert!(line.contains("\"payload\":\"0001abff\""));

    let parsed = RecordEntry::from_line(&line).unwrap();
    assert_eq!(parsed, entry);
    assert!(parsed.verify());
}

#[test]
fn tampered_payload_fails_verification() {
    let mut entry = RecordEntry::new(Seq(1), RecordKind::Commit, b"{}".to_vec());
    entry.payload.push(b' ');
    assert!(!entry.verify());
}

#[test]
fn checksum_covers_seq_and_kind() {
    let a = RecordEntry::new(Seq(1), RecordKind::Data, b"x".to_vec());
    let b = RecordEntry::new(Seq(2), RecordKind::Data, b"x".to_vec());
    let c = RecordEntry::new(Seq(1), RecordKind::Commit, b"x".to_vec());
    assert_ne!(a.crc, b.crc);
    assert_ne!(a.crc, c.crc);
}

#[yare::parameterized(
    odd_length = { r#"{"seq":1,"kind":"data","payload":"abc","crc":0}"# },
    not_hex    = { r#"{"seq":1,"kind":"data","payload":"zz","crc":0}"# },
    truncated  = { r#"{"seq":1,"kind":"da"# },
)]
fn malformed_lines_are_rejected(line: &str) {
    assert!(RecordEntry::from_line(line).is_err());
}

#[test]
fn empty_payload_is_allowed() {
    let entry = RecordEntry::new(Seq(3), RecordKind::Checkpoint, Vec::new());
    let parsed = RecordEntry::from_line(&entry.to_line().unwrap()).unwrap();
    assert!(parsed.verify());
    assert_eq!(parsed.into_record().payload_len(), 0);
}
