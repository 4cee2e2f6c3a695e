//! Configuration handling for the peerlink probe.
//!
//! The probe reads one YAML file holding a `network` section (the library's
//! [`NetworkConfig`]) and a `services.peerlink` section for the probe itself,
//! then applies environment variable overrides.

use anyhow::Result;
use peerlink_session::NetworkConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Probe configuration
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Remote host to connect to
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Payloads sent after every connect
    pub payloads: Vec<String>,
    /// Library settings
    pub network: NetworkConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
            payloads: Vec::new(),
            network: NetworkConfig::default(),
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    network: Option<NetworkConfig>,
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    peerlink: Option<ServiceConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    args: Option<Vec<String>>,
    config: Option<HashMap<String, String>>,
}

impl ProbeConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => warn!(
                    "Failed to parse config file {:?}: {}, using defaults",
                    config_path.as_ref(),
                    e
                ),
            },
            Err(_) => warn!("Config file {:?} not found, using defaults", config_path.as_ref()),
        }

        config.apply_environment_overrides();
        config.network.apply_environment_overrides();
        config.network.validate()?;

        info!(
            "Final probe configuration: target={}:{}, payloads={}, auto_reconnect={}",
            config.host,
            config.port,
            config.payloads.len(),
            config.network.default_reconnect.enabled
        );

        Ok(config)
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        if let Some(network) = root_config.network {
            self.network = network;
        }

        if let Some(service) = root_config.services.and_then(|s| s.peerlink) {
            self.apply_service_config(service);
        }
    }

    fn apply_service_config(&mut self, service_config: ServiceConfig) {
        for arg in service_config.args.unwrap_or_default() {
            if let Some(host) = arg.strip_prefix("--host=") {
                self.host = host.to_string();
            } else if let Some(port) = arg.strip_prefix("--port=") {
                match port.parse::<u16>() {
                    Ok(port) => self.port = port,
                    Err(_) => warn!("Ignoring invalid port argument {:?}", arg),
                }
            } else if let Some(payload) = arg.strip_prefix("--send=") {
                self.payloads.push(payload.to_string());
            }
        }

        for (key, value) in service_config.config.unwrap_or_default() {
            match key.as_str() {
                "services.peerlink.host" => self.host = value,
                "services.peerlink.port" => {
                    if let Ok(port) = value.parse::<u16>() {
                        self.port = port;
                    }
                }
                "services.peerlink.auto_reconnect" => {
                    self.network.default_reconnect.enabled = value.eq_ignore_ascii_case("true");
                }
                _ => {
                    // Ignore unknown configuration keys
                }
            }
        }
    }

    fn apply_environment_overrides(&mut self) {
        if let Ok(host) = std::env::var("PEERLINK_HOST") {
            info!("Host overridden by environment: {}", host);
            self.host = host;
        }

        if let Ok(port) = std::env::var("PEERLINK_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.port = port;
                info!("Port overridden by environment: {}", port);
            }
        }
    }
}
