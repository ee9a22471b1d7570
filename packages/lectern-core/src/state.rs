//! Core configuration.
//!
//! Hosts build a [`Config`] (the standalone server from YAML, embedders in
//! code) and hand it to [`bootstrap_services`](crate::bootstrap_services).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::{CallerAllowList, DEFAULT_ALLOWED_CALLERS};
use crate::protocol_constants::{
    ARTWORK_FETCH_TIMEOUT_SECS, DUCK_VOLUME_FACTOR, MAX_ARTWORK_DIM, PORT_RANGE_START,
    POSITION_PUBLISH_INTERVAL_MS, SEARCH_RESULT_LIMIT, SELF_IDENTITY, SKIP_BACK_SECS,
    SKIP_FORWARD_SECS,
};

/// Configuration for the Lectern core.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    // Server
    /// Preferred port for the HTTP/WS server (0 = first free port in range).
    pub preferred_port: u16,

    // Artwork
    /// Longest edge of artwork sent to controllers (pixels).
    pub max_artwork_dim: u32,

    /// Timeout for remote artwork downloads (seconds).
    pub artwork_fetch_timeout_secs: u64,

    /// Resolved artwork entries kept in memory (0 disables the cache).
    pub artwork_cache_entries: usize,

    // Catalog
    pub search_result_limit: usize,

    // Session
    /// Interval between position snapshots while playing (milliseconds).
    pub position_publish_interval_ms: u64,

    /// Volume factor applied while ducked.
    pub duck_volume_factor: f32,

    pub skip_forward_secs: u64,

    pub skip_back_secs: u64,

    // Authorization
    /// Identity the server presents for its own commands.
    pub self_identity: String,

    /// Caller identities admitted besides `self_identity`.
    pub allowed_callers: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preferred_port: PORT_RANGE_START,
            max_artwork_dim: MAX_ARTWORK_DIM,
            artwork_fetch_timeout_secs: ARTWORK_FETCH_TIMEOUT_SECS,
            artwork_cache_entries: 128,
            search_result_limit: SEARCH_RESULT_LIMIT,
            position_publish_interval_ms: POSITION_PUBLISH_INTERVAL_MS,
            duck_volume_factor: DUCK_VOLUME_FACTOR,
            skip_forward_secs: SKIP_FORWARD_SECS,
            skip_back_secs: SKIP_BACK_SECS,
            self_identity: SELF_IDENTITY.to_string(),
            allowed_callers: DEFAULT_ALLOWED_CALLERS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl Config {
    /// Checks that values are within usable ranges.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_artwork_dim == 0 {
            return Err("max_artwork_dim must be >= 1".to_string());
        }
        if self.artwork_fetch_timeout_secs == 0 {
            return Err("artwork_fetch_timeout_secs must be >= 1".to_string());
        }
        if self.search_result_limit == 0 {
            return Err("search_result_limit must be >= 1".to_string());
        }
        if self.position_publish_interval_ms == 0 {
            return Err("position_publish_interval_ms must be >= 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.duck_volume_factor) {
            return Err("duck_volume_factor must be within 0.0..=1.0".to_string());
        }
        if self.skip_forward_secs == 0 || self.skip_back_secs == 0 {
            return Err("skip increments must be >= 1 second".to_string());
        }
        if self.self_identity.trim().is_empty() {
            return Err("self_identity must not be empty".to_string());
        }
        Ok(())
    }

    pub fn position_publish_interval(&self) -> Duration {
        Duration::from_millis(self.position_publish_interval_ms)
    }

    pub fn artwork_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.artwork_fetch_timeout_secs)
    }

    /// Allow-list built from `allowed_callers` plus `self_identity`.
    pub fn allow_list(&self) -> CallerAllowList {
        CallerAllowList::new(self.allowed_callers.iter(), &self.self_identity)
    }
}
