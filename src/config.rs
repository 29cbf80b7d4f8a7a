// =============================================================================
// FABRIC CORE — config.rs
// =============================================================================
//
// FabricConfig — all tunables of the fabric in one record.
//
//   Default   — values from constants.rs
//   from_env  — FABRIC_* overrides on top of the defaults
//
// Bad values in the environment are logged and ignored, never fatal.
// =============================================================================

use crate::balancer::Strategy;
use crate::constants::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabricConfig {
    pub max_connections_per_node: usize,
    pub max_hops: usize,
    pub max_queue_size: usize,
    pub batch_size: usize,
    pub routing_refresh_interval: Duration,
    pub tick_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub strategy: Strategy,
    pub load_history_cap: usize,
    pub federation_anchor_count: usize,
}

impl Default for FabricConfig {
    fn default() -> Self {
        FabricConfig {
            max_connections_per_node: MAX_CONNECTIONS_PER_NODE,
            max_hops: MAX_HOPS,
            max_queue_size: MAX_QUEUE_SIZE,
            batch_size: BATCH_SIZE,
            routing_refresh_interval: Duration::from_secs(ROUTING_REFRESH_SECS),
            tick_interval: Duration::from_secs(TICK_INTERVAL_SECS),
            heartbeat_timeout: Duration::from_secs(HEARTBEAT_TIMEOUT_SECS),
            strategy: Strategy::Composite,
            load_history_cap: LOAD_HISTORY_CAP,
            federation_anchor_count: FEDERATION_ANCHOR_COUNT,
        }
    }
}

impl FabricConfig {
    /// Defaults overlaid with `FABRIC_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = FabricConfig::default();

        if let Some(v) = env_parse(&lookup, "FABRIC_MAX_CONNECTIONS") {
            cfg.max_connections_per_node = v;
        }
        if let Some(v) = env_parse(&lookup, "FABRIC_MAX_HOPS") {
            cfg.max_hops = v;
        }
        if let Some(v) = env_parse(&lookup, "FABRIC_MAX_QUEUE") {
            cfg.max_queue_size = v;
        }
        if let Some(v) = env_parse(&lookup, "FABRIC_BATCH_SIZE") {
            cfg.batch_size = v;
        }
        if let Some(v) = env_parse(&lookup, "FABRIC_STRATEGY") {
            cfg.strategy = v;
        }
        if let Some(secs) = env_parse(&lookup, "FABRIC_REFRESH_SECS") {
            cfg.routing_refresh_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse(&lookup, "FABRIC_TICK_SECS") {
            cfg.tick_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse(&lookup, "FABRIC_HEARTBEAT_TIMEOUT_SECS") {
            cfg.heartbeat_timeout = Duration::from_secs(secs);
        }

        cfg
    }
}

fn env_parse<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let raw = lookup(key)?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("{} ignored (unparsable value): {}", key, raw);
            None
        }
    }
}
