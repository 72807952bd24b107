//! Hardware configuration
//!
//! Port definitions and the loader settings that decide which system ports
//! the COM-port driver offers and where device configuration is persisted.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for the static plugin loader
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// System ports offered to port-bound drivers
    #[serde(default)]
    pub ports: Vec<PortConfig>,
    /// TOML file backing the configuration store; in-memory when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
    /// Also offer serial ports reported by the OS
    #[serde(default)]
    pub scan_serial_ports: bool,
}

impl LoaderConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

// =============================================================================
// Port Configuration
// =============================================================================

/// Port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PortConfig {
    /// COM / USB-serial port
    Serial(SerialPortConfig),
    /// Network socket
    Tcp(TcpPortConfig),
    /// Mock port for testing
    Mock(MockPortConfig),
}

impl PortConfig {
    /// System name the port is offered under
    pub fn system_name(&self) -> String {
        match self {
            PortConfig::Serial(cfg) => cfg.name.clone(),
            PortConfig::Tcp(cfg) => format!("{}:{}", cfg.host, cfg.port),
            PortConfig::Mock(cfg) => cfg.name.clone(),
        }
    }

    /// Whether the port is addressed over the network
    pub fn is_network(&self) -> bool {
        matches!(self, PortConfig::Tcp(_))
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self::Mock(MockPortConfig::default())
    }
}

/// Serial port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialPortConfig {
    /// System name (e.g., "COM3")
    pub name: String,
    /// Device path when it differs from the name (e.g., "/dev/ttyUSB0")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Initial baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Quiet time that ends an answer (milliseconds)
    #[serde(default = "default_inter_byte_gap")]
    pub inter_byte_gap_ms: u64,
}

impl SerialPortConfig {
    /// Port opened by its OS name with default settings
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: None,
            baud_rate: default_baud_rate(),
            inter_byte_gap_ms: default_inter_byte_gap(),
        }
    }
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_inter_byte_gap() -> u64 {
    50
}

/// TCP port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpPortConfig {
    pub host: String,
    pub port: u16,
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Quiet time that ends an answer (milliseconds)
    #[serde(default = "default_inter_byte_gap")]
    pub inter_byte_gap_ms: u64,
}

impl TcpPortConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            connect_timeout_ms: default_connect_timeout(),
            inter_byte_gap_ms: default_inter_byte_gap(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    3000
}

/// Mock port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockPortConfig {
    #[serde(default = "default_mock_name")]
    pub name: String,
    /// Baud rate the simulated device listens on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_baud_rate: Option<u32>,
    /// Scripted request/response pairs (hex encoded)
    #[serde(default)]
    pub responses: Vec<MockResponse>,
}

fn default_mock_name() -> String {
    "MOCK".to_string()
}

impl Default for MockPortConfig {
    fn default() -> Self {
        Self {
            name: default_mock_name(),
            device_baud_rate: None,
            responses: Vec::new(),
        }
    }
}

/// One scripted exchange of a mock port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockResponse {
    pub request: String,
    pub response: String,
}

impl MockResponse {
    /// Decoded request/response bytes; `None` if either side is not hex
    pub fn decode(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        Some((hex::decode(&self.request).ok()?, hex::decode(&self.response).ok()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_loader_config() {
        let text = r#"
            store_path = "/var/lib/kiosk/devices.toml"

            [[ports]]
            type = "serial"
            name = "COM3"
            path = "/dev/ttyUSB0"

            [[ports]]
            type = "tcp"
            host = "10.0.0.5"
            port = 5000

            [[ports]]
            type = "mock"
            name = "COM9"
            device_baud_rate = 115200

            [[ports.responses]]
            request = "0210"
            response = "021000"
        "#;

        let config: LoaderConfig = toml::from_str(text).unwrap();
        assert_eq!(config.ports.len(), 3);
        assert_eq!(config.ports[0].system_name(), "COM3");
        assert_eq!(config.ports[1].system_name(), "10.0.0.5:5000");
        assert!(config.ports[1].is_network());
        assert!(!config.scan_serial_ports);

        match &config.ports[0] {
            PortConfig::Serial(cfg) => {
                assert_eq!(cfg.baud_rate, 9600);
                assert_eq!(cfg.inter_byte_gap_ms, 50);
            }
            other => panic!("Expected serial port, got {:?}", other),
        }
        match &config.ports[2] {
            PortConfig::Mock(cfg) => {
                assert_eq!(cfg.device_baud_rate, Some(115200));
                assert_eq!(
                    cfg.responses[0].decode(),
                    Some((vec![0x02, 0x10], vec![0x02, 0x10, 0x00]))
                );
            }
            other => panic!("Expected mock port, got {:?}", other),
        }
    }
}
