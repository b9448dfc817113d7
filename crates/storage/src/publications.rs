// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Publication catalog
//!
//! Publications are immutable values; `alter` swaps in a new `Arc` so a
//! running session keeps decoding against the definition it started with
//! until it looks the name up again.

use crate::atomic::{load_json, store_json};
use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tm_core::Publication;

pub const PUBLICATIONS_FILE: &str = "publications.json";

#[derive(Debug, Serialize, Deserialize)]
struct PublicationTable {
    version: u32,
    publications: Vec<Publication>,
}

type Publications = BTreeMap<String, Arc<Publication>>;

pub struct PublicationCatalog {
    path: Option<PathBuf>,
    entries: Mutex<Publications>,
}

impl PublicationCatalog {
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(PUBLICATIONS_FILE);
        let table: Option<PublicationTable> = load_json(&path)?;
        let entries = table
            .map(|t| t.publications)
            .unwrap_or_default()
            .into_iter()
            .map(|p| (p.name.clone(), Arc::new(p)))
            .collect();
        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(Publications::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Publications> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn commit(&self, live: &mut Publications, next: Publications) -> Result<(), StorageError> {
        if let Some(path) = &self.path {
            let table = PublicationTable {
                version: 1,
                publications: next.values().map(|p| (**p).clone()).collect(),
            };
            store_json(path, &table)?;
        }
        *live = next;
        Ok(())
    }

    fn validate(publication: &Publication) -> Result<(), StorageError> {
        let invalid = |reason: &str| StorageError::InvalidPublication {
            name: publication.name.clone(),
            reason: reason.to_string(),
        };
        if publication.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if publication.operations.is_empty() {
            return Err(invalid("at least one operation must be published"));
        }
        Ok(())
    }

    pub fn create(&self, publication: Publication) -> Result<Arc<Publication>, StorageError> {
        Self::validate(&publication)?;
        let mut live = self.lock();
        if live.contains_key(&publication.name) {
            return Err(StorageError::DuplicatePublication(publication.name));
        }
        let publication = Arc::new(publication);
        let mut next = live.clone();
        next.insert(publication.name.clone(), Arc::clone(&publication));
        self.commit(&mut live, next)?;
        tracing::info!(publication = %publication.name, "publication created");
        Ok(publication)
    }

    /// Replace an existing publication's definition
    pub fn alter(&self, publication: Publication) -> Result<Arc<Publication>, StorageError> {
        Self::validate(&publication)?;
        let mut live = self.lock();
        if !live.contains_key(&publication.name) {
            return Err(StorageError::PublicationNotFound(publication.name));
        }
        let publication = Arc::new(publication);
        let mut next = live.clone();
        next.insert(publication.name.clone(), Arc::clone(&publication));
        self.commit(&mut live, next)?;
        tracing::info!(publication = %publication.name, "publication altered");
        Ok(publication)
    }

    pub fn drop_publication(&self, name: &str) -> Result<(), StorageError> {
        let mut live = self.lock();
        if !live.contains_key(name) {
            return Err(StorageError::PublicationNotFound(name.to_string()));
        }
        let mut next = live.clone();
        next.remove(name);
        self.commit(&mut live, next)?;
        tracing::info!(publication = name, "publication dropped");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<Publication>, StorageError> {
        self.lock()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::PublicationNotFound(name.to_string()))
    }

    pub fn list(&self) -> Vec<Arc<Publication>> {
        self.lock().values().cloned().collect()
    }
}

#[cfg(test)]
#[path = "publications_tests.rs"]
mod tests;
