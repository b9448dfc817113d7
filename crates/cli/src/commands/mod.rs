// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI command implementations

pub mod daemon;
pub mod produce;
pub mod publication;
pub mod slot;
pub mod status;
pub mod subscribe;
