// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::collections::BTreeMap;
use tempfile::TempDir;

#[test]
fn missing_file_loads_as_none() {
    let dir = TempDir::new().unwrap();
    let loaded: Option<BTreeMap<String, u64>> = load_json(&dir.path().join("nope.json")).unwrap();
    assert!(loaded.is_none());
}

#[test]
fn store_replaces_previous_document() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("doc.json");

    let mut doc = BTreeMap::new();
    doc.insert("a".to_string(), 1u64);
    store_json(&path, &doc).unwrap();
    doc.insert("b".to_string(), 2u64);
    store_json(&path, &doc).unwrap();

    let loaded: BTreeMap<String, u64> = load_json(&path).unwrap().unwrap();
    assert_eq!(loaded, doc);
    assert!(!path.with_extension("tmp").exists());
}

#[test]
fn garbage_is_a_json_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("doc.json");
    std::fs::write(&path, b"{not json").unwrap();

    let err = load_json::<BTreeMap<String, u64>>(&path).unwrap_err();
    assert!(matches!(err, StorageError::Json(_)));
}
