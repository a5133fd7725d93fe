//! Client configuration at `~/.frelay/client.toml`.
//!
//! CLI flags always override config file values.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Default connection settings.
    #[serde(default)]
    pub default: DefaultConfig,
}

/// Default connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultConfig {
    /// Server address as `host:port`.
    #[serde(default = "default_server")]
    pub server: String,

    /// Seconds between connection attempts.
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,

    /// Connection attempts before giving up (0 = retry forever).
    #[serde(default)]
    pub retries: u32,
}

impl Default for DefaultConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            retry_interval: default_retry_interval(),
            retries: 0,
        }
    }
}

fn default_server() -> String {
    "127.0.0.1:7788".to_string()
}

fn default_retry_interval() -> u64 {
    1
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &str) -> Result<Self> {
        let path = expand_tilde(path);
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    Path::new(path).to_path_buf()
}
