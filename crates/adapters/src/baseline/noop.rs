// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{BaselineError, BaselineRow, BaselineSource};
use async_trait::async_trait;
use tm_core::{EntityFilter, Seq};

/// Baseline with no rows; catch-up delivers an empty snapshot batch
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpBaseline;

#[async_trait]
impl BaselineSource for NoOpBaseline {
    async fn snapshot(
        &self,
        _entities: &EntityFilter,
        _as_of: Seq,
    ) -> Result<Vec<BaselineRow>, BaselineError> {
        Ok(Vec::new())
    }
}
