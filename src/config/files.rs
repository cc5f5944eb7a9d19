//! User and device config files (read-only).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

use super::{WIFI_PASSWORD_ENV, WIFI_SSID_ENV};

/// Serial baud rate used when neither flags nor config name one.
pub const DEFAULT_BAUD: u32 = 921_600;

/// `~/.config/jaguar/config.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    pub port: Option<String>,
    pub baud: Option<u32>,
    #[serde(default)]
    pub wifi: WifiConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WifiConfig {
    pub ssid: Option<String>,
    pub password: Option<String>,
}

impl UserConfig {
    /// Load the config, or defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading user config '{}'", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing user config '{}'", path.display()))
    }

    pub fn baud(&self) -> u32 {
        self.baud.unwrap_or(DEFAULT_BAUD)
    }

    /// WiFi credentials with `JAG_WIFI_SSID`/`JAG_WIFI_PASSWORD` taking
    /// precedence over the file.
    pub fn wifi_from_env(&self) -> WifiConfig {
        WifiConfig {
            ssid: env::var(WIFI_SSID_ENV).ok().or_else(|| self.wifi.ssid.clone()),
            password: env::var(WIFI_PASSWORD_ENV)
                .ok()
                .or_else(|| self.wifi.password.clone()),
        }
    }
}

/// `~/.config/jaguar/device.toml`: the device commands talk to by default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    pub device: DeviceEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceEntry {
    pub id: uuid::Uuid,
    pub name: String,
    pub address: String,
    pub sdk_version: String,
}

impl DeviceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| {
            format!(
                "reading device config '{}'; no device has been selected",
                path.display()
            )
        })?;
        toml::from_str(&text)
            .with_context(|| format!("parsing device config '{}'", path.display()))
    }
}
