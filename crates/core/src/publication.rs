// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Publications: which entities and operations reach consumers

use crate::change::ChangeOp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Entities covered by a publication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "entities", rename_all = "snake_case")]
pub enum EntityFilter {
    All,
    Only(BTreeSet<String>),
}

impl EntityFilter {
    pub fn only<I, S>(entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EntityFilter::Only(entities.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, entity: &str) -> bool {
        match self {
            EntityFilter::All => true,
            EntityFilter::Only(set) => set.contains(entity),
        }
    }
}

/// Subset of operations a publication exposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationMask(BTreeSet<ChangeOp>);

impl OperationMask {
    pub fn all() -> Self {
        Self(ChangeOp::ALL.into_iter().collect())
    }

    pub fn of(ops: impl IntoIterator<Item = ChangeOp>) -> Self {
        Self(ops.into_iter().collect())
    }

    pub fn allows(&self, op: ChangeOp) -> bool {
        self.0.contains(&op)
    }

    pub fn iter(&self) -> impl Iterator<Item = ChangeOp> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for OperationMask {
    fn default() -> Self {
        Self::all()
    }
}

/// A named, immutable filter shared read-only by every session using it.
///
/// Redefinition replaces the whole value in the catalog; sessions started
/// before the change keep the definition they were started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub name: String,
    pub entities: EntityFilter,
    pub operations: OperationMask,
}

impl Publication {
    pub fn new(name: impl Into<String>, entities: EntityFilter, operations: OperationMask) -> Self {
        Self {
            name: name.into(),
            entities,
            operations,
        }
    }

    /// Publication of every operation on every entity
    pub fn all(name: impl Into<String>) -> Self {
        Self::new(name, EntityFilter::All, OperationMask::all())
    }

    /// Whether a change to `entity` of kind `op` is published
    pub fn publishes(&self, entity: &str, op: ChangeOp) -> bool {
        self.operations.allows(op) && self.entities.contains(entity)
    }
}

#[cfg(test)]
#[path = "publication_tests.rs"]
mod tests;
