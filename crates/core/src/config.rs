//! Persisted configuration.
//!
//! Stored as JSON. A missing file is created with defaults on first load so
//! users have something to edit.

use crate::connectivity::POWERSAVE_WINDOW;
use crate::error::{Error, Result};
use crate::sink::Topics;
use crate::transport::HidEndpoint;
use crate::{pids, LOGITECH_VID};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Directory name under the platform config root.
const APP_DIR: &str = "unify-status";
/// Config file name.
const CONFIG_FILE: &str = "config.json";

/// HID collections of the receiver to talk to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    /// USB interface carrying HID++ traffic.
    pub interface: i32,
    pub usage_page: u16,
    /// Usage of the short-report collection (commands and notifications).
    pub primary_usage: u16,
    /// Usage of the long-report collection (names).
    pub responder_usage: u16,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            vendor_id: LOGITECH_VID,
            product_id: pids::UNIFYING_RECEIVER,
            interface: 2,
            usage_page: 0xFF00,
            primary_usage: 0x0001,
            responder_usage: 0x0002,
        }
    }
}

impl ReceiverConfig {
    fn endpoint(&self, usage: u16) -> HidEndpoint {
        HidEndpoint {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            interface: self.interface,
            usage_page: self.usage_page,
            usage,
        }
    }

    pub fn primary(&self) -> HidEndpoint {
        self.endpoint(self.primary_usage)
    }

    pub fn responder(&self) -> HidEndpoint {
        self.endpoint(self.responder_usage)
    }
}

/// Broker connection for the MQTT sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker address, `tcp://host[:port]`.
    pub address: String,
    /// Left empty for anonymous access.
    pub username: String,
    pub password: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            address: "tcp://localhost:1883".into(),
            username: String::new(),
            password: String::new(),
            keep_alive_secs: 60,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Home Assistant discovery prefix.
    pub discovery_prefix: String,
    /// Node id used in topics and as the discovery device id.
    pub node_id: String,
    /// Receiver search cadence.
    pub poll_interval_ms: u64,
    /// Disconnects closer than this to the last connect mean powersave.
    pub powersave_window_ms: u64,
    /// Consume the register-read echo after enabling notifications.
    pub read_enable_echo: bool,
    /// Consume the undocumented long frame preceding a post-connect name.
    pub read_connect_preamble: bool,
    pub receiver: ReceiverConfig,
    pub mqtt: MqttConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_prefix: "homeassistant".into(),
            node_id: "logitech-unify-mqtt".into(),
            poll_interval_ms: 1000,
            powersave_window_ms: POWERSAVE_WINDOW.as_millis() as u64,
            read_enable_echo: false,
            read_connect_preamble: false,
            receiver: ReceiverConfig::default(),
            mqtt: MqttConfig::default(),
        }
    }
}

impl Config {
    pub fn topics(&self) -> Topics {
        Topics::new(&self.discovery_prefix, &self.node_id)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn powersave_window(&self) -> Duration {
        Duration::from_millis(self.powersave_window_ms)
    }
}

/// Default config file location.
///
/// `%LOCALAPPDATA%\unify-status\config.json` on Windows,
/// `$XDG_CONFIG_HOME/unify-status/config.json` (or `~/.config/...`) elsewhere.
pub fn config_path() -> Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let local_app_data = std::env::var_os("LOCALAPPDATA")
            .ok_or_else(|| Error::Config("LOCALAPPDATA is not set".to_string()))?;
        Ok(PathBuf::from(local_app_data).join(APP_DIR).join(CONFIG_FILE))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let base = match std::env::var_os("XDG_CONFIG_HOME") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .ok_or_else(|| Error::Config("neither XDG_CONFIG_HOME nor HOME is set".to_string()))?,
        };
        Ok(base.join(APP_DIR).join(CONFIG_FILE))
    }
}

/// Write `config` to `path`, creating parent directories.
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::Config(format!("create {}: {e}", dir.display())))?;
    }
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("serialize: {e}")))?;
    std::fs::write(path, json).map_err(|e| Error::Config(format!("write {}: {e}", path.display())))
}

/// Load the config at `path`, writing defaults there if it does not exist.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        let config = Config::default();
        save_config(&config, path)?;
        info!(path = %path.display(), "Wrote default config");
        return Ok(config);
    }

    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
    serde_json::from_str(&text).map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))
}
