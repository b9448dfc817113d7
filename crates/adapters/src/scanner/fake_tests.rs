// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn walks_units_in_position_order() {
    let scanner = FakeScanner::new();
    scanner.add_shard("orders", vec![DeadUnit::new(30), DeadUnit::new(10), DeadUnit::new(20)]);

    let mut after = None;
    let mut seen = Vec::new();
    while let Some(unit) = scanner.next_dead_unit("orders", after).await.unwrap() {
        seen.push(unit.position.0);
        after = Some(unit.position);
    }
    assert_eq!(seen, vec![10, 20, 30]);
    assert_eq!(scanner.next_calls("orders"), 4);
}

#[tokio::test]
async fn resumes_from_saved_position() {
    let scanner = FakeScanner::new();
    scanner.add_shard("orders", vec![DeadUnit::new(1), DeadUnit::new(2), DeadUnit::new(3)]);

    let unit = scanner
        .next_dead_unit("orders", Some(ScanPosition(1)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unit.position, ScanPosition(2));
}

#[tokio::test]
async fn unknown_and_failing_shards_error() {
    let scanner = FakeScanner::new();
    scanner.add_shard("a", vec![DeadUnit::new(1)]);
    scanner.fail_shard("a");

    assert!(matches!(
        scanner.next_dead_unit("b", None).await,
        Err(ScanError::ShardNotFound(_))
    ));
    assert!(matches!(
        scanner.next_dead_unit("a", None).await,
        Err(ScanError::Failed(_))
    ));
    assert_eq!(scanner.shards().await.unwrap(), vec!["a".to_string()]);
}
