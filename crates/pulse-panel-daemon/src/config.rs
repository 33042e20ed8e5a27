//! Configuration management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Sampling tick interval in milliseconds
    #[serde(default = "default_tick")]
    pub tick: u64,

    /// Web UI configuration
    #[serde(default)]
    pub web: WebConfig,

    /// D-Bus configuration
    #[serde(default)]
    pub dbus: DbusConfig,

    /// Host sensor configuration
    #[serde(default)]
    pub sensors: SensorsConfig,

    /// Speed test configuration
    #[serde(default)]
    pub speedtest: SpeedTestConfig,
}

/// Web UI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Whether to serve the web UI
    #[serde(default = "default_true")]
    pub enable: bool,

    /// Listen address (e.g., "127.0.0.1:8787")
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enable: default_true(),
            listen: default_listen(),
        }
    }
}

/// Which D-Bus bus to register on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbusBusType {
    /// Try the session bus first, fall back to the system bus
    #[default]
    Auto,
    /// User session bus
    Session,
    /// System-wide bus
    System,
}

/// D-Bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DbusConfig {
    /// Bus selection
    #[serde(default)]
    pub bus: DbusBusType,
}

/// Host sensor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorsConfig {
    /// Mount point whose usage is reported as disk usage
    #[serde(default = "default_disk_mount")]
    pub disk_mount: String,

    /// Network interface to count traffic on (None = all non-loopback interfaces)
    #[serde(default)]
    pub network_interface: Option<String>,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            disk_mount: default_disk_mount(),
            network_interface: None,
        }
    }
}

/// Speed test configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedTestConfig {
    /// URL fetched to measure download speed (plain http)
    #[serde(default = "default_download_url")]
    pub download_url: String,

    /// URL posted to when measuring upload speed (plain http)
    #[serde(default = "default_upload_url")]
    pub upload_url: String,

    /// Number of bytes sent during the upload measurement
    #[serde(default = "default_upload_bytes")]
    pub upload_bytes: usize,

    /// Socket connect/read/write timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SpeedTestConfig {
    fn default() -> Self {
        Self {
            download_url: default_download_url(),
            upload_url: default_upload_url(),
            upload_bytes: default_upload_bytes(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// Default value functions
fn default_tick() -> u64 {
    pulse_panel_core::DEFAULT_TICK_INTERVAL.as_millis() as u64
}

fn default_true() -> bool {
    true
}

fn default_listen() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_disk_mount() -> String {
    "/".to_string()
}

fn default_download_url() -> String {
    "http://speedtest.tele2.net/10MB.zip".to_string()
}

fn default_upload_url() -> String {
    "http://speedtest.tele2.net/upload.php".to_string()
}

fn default_upload_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read configuration file")?;
        Self::parse(&content)
    }

    /// Parses configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse configuration")?;
        if config.tick == 0 {
            anyhow::bail!("tick interval must be greater than zero");
        }
        Ok(config)
    }

    /// Returns the tick interval.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick: default_tick(),
            web: WebConfig::default(),
            dbus: DbusConfig::default(),
            sensors: SensorsConfig::default(),
            speedtest: SpeedTestConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.tick_interval(), pulse_panel_core::DEFAULT_TICK_INTERVAL);
        assert!(config.web.enable);
        assert_eq!(config.dbus.bus, DbusBusType::Auto);
        assert_eq!(config.sensors.disk_mount, "/");
        assert!(config.sensors.network_interface.is_none());
        assert_eq!(config.speedtest.timeout_secs, 30);
    }

    #[test]
    fn test_partial_config() {
        let config = Config::parse(
            r#"
            tick = 2000

            [dbus]
            bus = "session"

            [sensors]
            network_interface = "wlan0"

            [speedtest]
            upload_bytes = 1024
            "#,
        )
        .unwrap();
        assert_eq!(config.tick, 2000);
        assert_eq!(config.dbus.bus, DbusBusType::Session);
        assert_eq!(config.sensors.network_interface.as_deref(), Some("wlan0"));
        assert_eq!(config.speedtest.upload_bytes, 1024);
        assert_eq!(config.web.listen, "127.0.0.1:8787");
    }

    #[test]
    fn test_shipped_config_parses() {
        let config = Config::parse(include_str!("../config/default.toml")).unwrap();
        assert_eq!(config.tick, 1000);
        assert_eq!(config.dbus.bus, DbusBusType::Auto);
        assert!(config.sensors.network_interface.is_none());
    }

    #[test]
    fn test_zero_tick_rejected() {
        assert!(Config::parse("tick = 0").is_err());
    }
}
