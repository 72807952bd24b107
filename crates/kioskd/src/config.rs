//! Daemon configuration

use std::path::Path;

use anyhow::Context;
use kiosk_core::Config;
use kiosk_devmgr::DeviceManagerConfig;
use kiosk_hw::LoaderConfig;
use serde::{Deserialize, Serialize};

/// Top-level `kioskd` configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub manager: DeviceManagerConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    /// Ports and configuration store
    #[serde(flatten)]
    pub loader: LoaderConfig,
    /// Devices acquired at startup
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl DaemonConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Run detection at startup
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Only drivers whose path contains this substring are probed
    #[serde(default)]
    pub filter: String,
}

fn default_true() -> bool {
    true
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            filter: String::new(),
        }
    }
}

/// Explicitly configured device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub instance_path: String,
    /// Defaults to the instance path
    #[serde(default)]
    pub config_path: String,
    /// Stored under `config_path` before the device is acquired
    #[serde(default)]
    pub settings: Config,
}
