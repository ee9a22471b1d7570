//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to (0 = first free port in range).
    /// Override: `LECTERN_BIND_PORT`
    pub bind_port: u16,

    /// JSON catalog to serve. An empty library is served when unset.
    /// Override: `LECTERN_LIBRARY_PATH`
    pub library_path: Option<PathBuf>,

    /// Longest edge of artwork sent to controllers (pixels).
    /// Override: `LECTERN_MAX_ARTWORK_DIM`
    pub max_artwork_dim: u32,

    /// Caller identities admitted besides `self_identity`.
    pub allowed_callers: Vec<String>,

    pub self_identity: String,

    /// Interval between position updates while playing (milliseconds).
    pub position_publish_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = lectern_core::Config::default();
        Self {
            bind_port: core.preferred_port,
            library_path: None,
            max_artwork_dim: core.max_artwork_dim,
            allowed_callers: core.allowed_callers,
            self_identity: core.self_identity,
            position_publish_interval_ms: core.position_publish_interval_ms,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`. Unparseable values are ignored.
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("LECTERN_BIND_PORT").and_then(|v| v.parse().ok()) {
            self.bind_port = port;
        }

        if let Some(path) = lookup("LECTERN_LIBRARY_PATH").filter(|v| !v.is_empty()) {
            self.library_path = Some(PathBuf::from(path));
        }

        if let Some(dim) = lookup("LECTERN_MAX_ARTWORK_DIM").and_then(|v| v.parse().ok()) {
            self.max_artwork_dim = dim;
        }

        // Note: LECTERN_LOG_LEVEL is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Converts to lectern-core's Config type.
    pub fn to_core_config(&self) -> lectern_core::Config {
        lectern_core::Config {
            preferred_port: self.bind_port,
            max_artwork_dim: self.max_artwork_dim,
            allowed_callers: self.allowed_callers.clone(),
            self_identity: self.self_identity.clone(),
            position_publish_interval_ms: self.position_publish_interval_ms,
            ..Default::default()
        }
    }
}
