//! Server configuration: TOML file + CLI overrides.

use crate::registry::{IdPolicy, DEFAULT_WRITE_TIMEOUT};
use frelay_core::{RelayError, RelayResult, DEFAULT_MAX_FRAME_LEN};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// Seconds without inbound bytes before a session is closed; 0 disables.
    #[serde(default)]
    pub idle_timeout: u64,
    /// Seconds a single frame write may take before the session is dropped; 0 disables.
    #[serde(default = "default_write_timeout")]
    pub write_timeout: u64,
    #[serde(default)]
    pub id_policy: IdPolicy,
    /// Seconds between player list broadcasts; 0 sends only on join/leave.
    #[serde(default = "default_player_list_interval")]
    pub player_list_interval: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_frame_len: default_max_frame_len(),
            idle_timeout: 0,
            write_timeout: default_write_timeout(),
            id_policy: IdPolicy::default(),
            player_list_interval: default_player_list_interval(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:7788".to_string()
}
fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}
fn default_write_timeout() -> u64 {
    DEFAULT_WRITE_TIMEOUT.as_secs()
}
fn default_player_list_interval() -> u64 {
    1
}

/// Values given on the command line; each one beats the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub listen: Option<String>,
    pub max_frame_len: Option<usize>,
    pub idle_timeout: Option<u64>,
    pub write_timeout: Option<u64>,
    pub id_policy: Option<IdPolicy>,
    pub player_list_interval: Option<u64>,
}

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub max_frame_len: usize,
    pub idle_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub id_policy: IdPolicy,
    pub player_list_interval: Option<Duration>,
}

impl ServerConfig {
    /// Load config from a TOML file (defaults if missing), then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli: &CliOverrides) -> RelayResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| RelayError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };
        Self::resolve(file_config, cli)
    }

    /// Merge a parsed file with CLI overrides and validate the result.
    pub fn resolve(file: ConfigFile, cli: &CliOverrides) -> RelayResult<Self> {
        let server = file.server;

        let listen_str = cli.listen.clone().unwrap_or(server.listen);
        let listen: SocketAddr = listen_str
            .parse()
            .map_err(|e| RelayError::Config(format!("invalid listen address {listen_str:?}: {e}")))?;

        let max_frame_len = cli.max_frame_len.unwrap_or(server.max_frame_len);
        if max_frame_len == 0 {
            return Err(RelayError::Config("max_frame_len must be positive".into()));
        }

        let idle_timeout = cli.idle_timeout.unwrap_or(server.idle_timeout);
        let write_timeout = cli.write_timeout.unwrap_or(server.write_timeout);
        let player_list_interval = cli
            .player_list_interval
            .unwrap_or(server.player_list_interval);

        Ok(Self {
            listen,
            max_frame_len,
            idle_timeout: secs(idle_timeout),
            write_timeout: secs(write_timeout),
            id_policy: cli.id_policy.unwrap_or(server.id_policy),
            player_list_interval: secs(player_list_interval),
        })
    }
}

fn secs(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
