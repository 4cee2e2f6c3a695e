//! Network configuration.
//!
//! Values come from defaults, an optional YAML file, and `PEERLINK_*`
//! environment variables, in that order of precedence (last wins).

use crate::error::{NetworkError, Result};
use crate::reconnect::ReconnectConfig;
use peerlink_wire::{DEFAULT_MAX_FRAME_SIZE, HARD_MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Configuration for a [`Network`](crate::Network) instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Largest payload accepted in either direction
    pub max_frame_size: usize,
    /// Upper bound for one transport handshake in milliseconds
    pub connect_timeout_ms: u64,
    /// Size of the scratch buffer used for each socket read
    pub read_chunk_size: usize,
    /// Accept sends while a handshake is in progress and flush them once connected
    pub buffer_while_connecting: bool,
    /// Emit a disconnect event when a peer that never connected gives up
    pub report_initial_failure: bool,
    /// Name of the background worker thread
    pub worker_thread_name: String,
    /// Reconnect policy given to new peers
    pub default_reconnect: ReconnectConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            connect_timeout_ms: 10_000,
            read_chunk_size: 64 * 1024,
            buffer_while_connecting: false,
            report_initial_failure: true,
            worker_thread_name: "peerlink-worker".to_string(),
            default_reconnect: ReconnectConfig::default(),
        }
    }
}

impl NetworkConfig {
    /// Handshake timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size == 0 || self.max_frame_size > HARD_MAX_FRAME_SIZE {
            return Err(NetworkError::Config(format!(
                "max_frame_size must be in 1..={}, got {}",
                HARD_MAX_FRAME_SIZE, self.max_frame_size
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(NetworkError::Config(
                "connect_timeout_ms must be positive".to_string(),
            ));
        }
        if self.read_chunk_size == 0 {
            return Err(NetworkError::Config(
                "read_chunk_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from a YAML file and environment variables.
    ///
    /// A missing or unparsable file is not an error; defaults are used.
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<NetworkConfig>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                    config
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?}: {}, using defaults",
                        config_path.as_ref(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", config_path.as_ref());
                Self::default()
            }
        };

        config.apply_environment_overrides();
        config.validate()?;

        info!(
            "Final network configuration: max_frame_size={}, connect_timeout_ms={}, auto_reconnect={}",
            config.max_frame_size, config.connect_timeout_ms, config.default_reconnect.enabled
        );

        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_environment_overrides(&mut self) {
        if let Some(size) = env_parse::<usize>("PEERLINK_MAX_FRAME_SIZE") {
            self.max_frame_size = size;
            info!("Max frame size overridden by environment: {}", size);
        }

        if let Some(ms) = env_parse::<u64>("PEERLINK_CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = ms;
            info!("Connect timeout overridden by environment: {}ms", ms);
        }

        if let Some(enabled) = env_parse::<bool>("PEERLINK_AUTO_RECONNECT") {
            self.default_reconnect.enabled = enabled;
            info!("Auto-reconnect overridden by environment: {}", enabled);
        }

        if let Some(ms) = env_parse::<u32>("PEERLINK_RECONNECT_INITIAL_MS") {
            self.default_reconnect.initial_delay_ms = ms;
            info!("Initial reconnect delay overridden by environment: {}ms", ms);
        }

        if let Some(ms) = env_parse::<u32>("PEERLINK_RECONNECT_MAX_MS") {
            self.default_reconnect.max_delay_ms = ms;
            info!("Max reconnect delay overridden by environment: {}ms", ms);
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let value = std::env::var(key).ok()?;
    match value.trim().to_lowercase().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring unparsable {}={:?}", key, value);
            None
        }
    }
}
