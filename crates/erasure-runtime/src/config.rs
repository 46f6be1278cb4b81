//! Engine configuration (spec.md §6).
//!
//! `EngineConfig` is a plain, serde-deserializable settings bag with the same
//! defaults-function idiom the root binary's TOML/env layering builds on top
//! of (mirrors `forge_config.rs`'s `DefaultsConfig`). This crate does not
//! parse TOML or read the environment itself — that belongs to the binary
//! that owns the process's configuration sources.

use std::collections::HashMap;
use std::time::Duration;

use erasure_common::System;
use serde::{Deserialize, Serialize};

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    1000
}

fn default_retry_backoff_multiplier() -> f64 {
    2.0
}

fn default_worker_pool_size() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_connector_timeout_ms() -> u64 {
    15_000
}

fn default_zombie_interval_days() -> u32 {
    30
}

fn default_zombie_scan_cadence_hours() -> u64 {
    6
}

/// Retry and worker-pool tuning (spec.md §6 configuration table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-step retry budget.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// First retry delay, milliseconds.
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    /// Exponential growth factor applied to the retry delay.
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: f64,
    /// Parallelism across workflows (dispatcher shard/worker count).
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Backpressure threshold per shard queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Hard call timeout per system, milliseconds. Systems not named here
    /// fall back to `default_connector_timeout_ms`.
    #[serde(default)]
    pub connector_timeout_ms: HashMap<String, u64>,
    /// Fallback connector timeout for systems with no per-system override.
    #[serde(default = "default_connector_timeout_ms")]
    pub default_connector_timeout_ms: u64,
    /// Zombie re-verification interval, overridden by policy per jurisdiction.
    #[serde(default = "default_zombie_interval_days")]
    pub default_zombie_interval_days: u32,
    /// Cadence of the zombie cron scanner, hours.
    #[serde(default = "default_zombie_scan_cadence_hours")]
    pub zombie_scan_cadence_hours: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: default_max_retry_attempts(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            retry_backoff_multiplier: default_retry_backoff_multiplier(),
            worker_pool_size: default_worker_pool_size(),
            queue_capacity: default_queue_capacity(),
            connector_timeout_ms: HashMap::new(),
            default_connector_timeout_ms: default_connector_timeout_ms(),
            default_zombie_interval_days: default_zombie_interval_days(),
            zombie_scan_cadence_hours: default_zombie_scan_cadence_hours(),
        }
    }
}

impl EngineConfig {
    /// Resolves the connector timeout for `system`, falling back to the
    /// process-wide default when no per-system override is configured.
    pub fn connector_timeout(&self, system: System) -> Duration {
        let ms = self
            .connector_timeout_ms
            .get(system.as_str())
            .copied()
            .unwrap_or(self.default_connector_timeout_ms);
        Duration::from_millis(ms)
    }

    pub fn zombie_scan_cadence(&self) -> Duration {
        Duration::from_secs(self.zombie_scan_cadence_hours * 3600)
    }

    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = EngineConfig::default();
        assert_eq!(config.max_retry_attempts, 3);
        assert_eq!(config.initial_retry_delay_ms, 1000);
        assert!((config.retry_backoff_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.default_zombie_interval_days, 30);
        assert_eq!(config.zombie_scan_cadence_hours, 6);
    }

    #[test]
    fn per_system_timeout_override_falls_back_to_default() {
        let mut config = EngineConfig::default();
        config.connector_timeout_ms.insert("stripe".into(), 5000);
        assert_eq!(config.connector_timeout(System::Stripe), Duration::from_millis(5000));
        assert_eq!(
            config.connector_timeout(System::Intercom),
            Duration::from_millis(config.default_connector_timeout_ms)
        );
    }

    #[test]
    fn deserializes_partial_config_with_defaults() {
        let parsed: EngineConfig = serde_json::from_value(serde_json::json!({
            "max_retry_attempts": 5
        }))
        .unwrap();
        assert_eq!(parsed.max_retry_attempts, 5);
        assert_eq!(parsed.worker_pool_size, default_worker_pool_size());
    }
}
