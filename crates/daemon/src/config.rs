// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `tidemark.toml`: optional daemon settings, every key defaulted.

use std::path::Path;
use std::time::Duration;

use crate::protocol::MAX_FRAME_BYTES;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tm_engine::{CostConfig, DecoderConfig, MaintenanceConfig, RuntimeConfig, SessionConfig};
use tm_storage::{RetentionLimits, StoreConfig};

/// Name of the settings file inside the data directory
pub const SETTINGS_FILE: &str = "tidemark.toml";

/// Largest `session.max_txn_bytes`; leaves room for the frame envelope
pub const MAX_TXN_BYTES_LIMIT: usize = MAX_FRAME_BYTES - 64 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub store: StoreSettings,
    pub maintenance: MaintenanceSettings,
    pub session: SessionSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSettings {
    pub segment_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records_per_segment: Option<u64>,
    pub sync_on_append: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        let store = StoreConfig::default();
        Self {
            segment_bytes: store.segment_bytes,
            records_per_segment: None,
            sync_on_append: store.sync_on_append,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaintenanceSettings {
    #[serde(with = "humantime_serde")]
    pub naptime: Duration,
    pub max_workers: usize,
    pub cost_limit: u64,
    #[serde(with = "humantime_serde")]
    pub cost_delay: Duration,
    pub cost_page_hit: u64,
    pub cost_page_miss: u64,
    pub cost_page_dirty: u64,
    /// Only consulted while no slot exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retention_bytes: Option<u64>,
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_retention_age: Option<Duration>,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        let maintenance = MaintenanceConfig::default();
        let cost = CostConfig::default();
        Self {
            naptime: maintenance.naptime,
            max_workers: maintenance.max_workers,
            cost_limit: cost.limit,
            cost_delay: cost.sleep_unit,
            cost_page_hit: cost.page_hit,
            cost_page_miss: cost.page_miss,
            cost_page_dirty: cost.page_dirty,
            max_retention_bytes: None,
            max_retention_age: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSettings {
    /// Batches buffered per subscriber before backpressure
    pub channel_capacity: usize,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub retry_initial_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub retry_max_backoff: Duration,
    pub physical_lag_window: u64,
    pub max_txn_changes: usize,
    /// Encoded bytes one transaction may occupy; must fit one wire frame
    pub max_txn_bytes: usize,
    pub initial_sync: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_origin: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            channel_capacity: RuntimeConfig::default().channel_capacity,
            poll_interval: session.poll_interval,
            retry_initial_backoff: session.retry_initial_backoff,
            retry_max_backoff: session.retry_max_backoff,
            physical_lag_window: session.physical_lag_window,
            max_txn_changes: session.decoder.max_txn_changes,
            max_txn_bytes: session.decoder.max_txn_bytes,
            initial_sync: session.initial_sync,
            skip_origin: None,
        }
    }
}

impl Settings {
    /// Load `tidemark.toml` from the data directory; a missing file means defaults
    pub fn load(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = data_dir.join(SETTINGS_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        let settings = Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })?;
        tracing::debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: SETTINGS_FILE.to_string(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.store.segment_bytes == 0 {
            return Err(ConfigError::Invalid(
                "store.segment_bytes must be positive".to_string(),
            ));
        }
        if self.maintenance.max_workers == 0 {
            return Err(ConfigError::Invalid(
                "maintenance.max_workers must be at least 1".to_string(),
            ));
        }
        if self.maintenance.cost_limit == 0 {
            return Err(ConfigError::Invalid(
                "maintenance.cost_limit must be positive".to_string(),
            ));
        }
        if self.session.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "session.channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.session.max_txn_changes == 0 {
            return Err(ConfigError::Invalid(
                "session.max_txn_changes must be positive".to_string(),
            ));
        }
        if self.session.max_txn_bytes == 0 || self.session.max_txn_bytes > MAX_TXN_BYTES_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "session.max_txn_bytes must be between 1 and {}",
                MAX_TXN_BYTES_LIMIT
            )));
        }
        Ok(())
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::default()
            .with_segment_bytes(self.store.segment_bytes)
            .with_records_per_segment(self.store.records_per_segment.unwrap_or(0))
            .with_sync_on_append(self.store.sync_on_append)
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        let m = &self.maintenance;
        let cost = CostConfig::new(m.cost_limit, m.cost_delay).with_page_costs(
            m.cost_page_hit,
            m.cost_page_miss,
            m.cost_page_dirty,
        );
        let maintenance = MaintenanceConfig::default()
            .with_naptime(m.naptime)
            .with_max_workers(m.max_workers)
            .with_cost(cost)
            .with_retention(RetentionLimits {
                max_bytes: m.max_retention_bytes,
                max_age: m.max_retention_age,
            });

        let s = &self.session;
        let mut decoder = DecoderConfig::default()
            .with_max_txn_changes(s.max_txn_changes)
            .with_max_txn_bytes(s.max_txn_bytes);
        if let Some(origin) = &s.skip_origin {
            decoder = decoder.with_skip_origin(origin.clone());
        }
        let session = SessionConfig::default()
            .with_poll_interval(s.poll_interval)
            .with_retry_backoff(s.retry_initial_backoff, s.retry_max_backoff)
            .with_physical_lag_window(s.physical_lag_window)
            .with_initial_sync(s.initial_sync)
            .with_decoder(decoder);

        RuntimeConfig::default()
            .with_session(session)
            .with_maintenance(maintenance)
            .with_channel_capacity(s.channel_capacity)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
