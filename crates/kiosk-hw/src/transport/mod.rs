//! Port implementations
//!
//! This module provides the channels drivers talk through:
//! - Serial adapter for COM / USB-serial devices
//! - TCP adapter for network-attached devices
//! - Mock adapter for testing
//!
//! # Example
//!
//! ```ignore
//! use kiosk_hw::transport::create_port;
//! use kiosk_hw::config::PortConfig;
//!
//! let port = create_port(&PortConfig::Mock(Default::default()))?;
//! port.open()?;
//! let answer = port.send_receive(&[0x02, 0x01, 0x10], Duration::from_secs(1))?;
//! ```

pub mod mock;
#[cfg(feature = "serial")]
pub mod serial;
pub mod tcp;

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

use kiosk_core::{Port, TransportError};
use parking_lot::RwLock;
use tracing::warn;

use crate::config::PortConfig;

pub use mock::MockPort;
pub use tcp::TcpPort;

/// Create a port based on configuration
pub fn create_port(config: &PortConfig) -> Result<Arc<dyn Port>, TransportError> {
    match config {
        #[cfg(feature = "serial")]
        PortConfig::Serial(cfg) => Ok(Arc::new(serial::SerialPort::new(cfg))),
        #[cfg(not(feature = "serial"))]
        PortConfig::Serial(_) => Err(TransportError::Unsupported(
            "serial ports require the 'serial' feature".to_string(),
        )),
        PortConfig::Tcp(cfg) => Ok(Arc::new(TcpPort::new(cfg))),
        PortConfig::Mock(cfg) => Ok(Arc::new(MockPort::from_config(cfg))),
    }
}

/// System ports offered to port-bound drivers, keyed by system name
#[derive(Default)]
pub struct PortRegistry {
    ports: RwLock<BTreeMap<String, Arc<dyn Port>>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured port; ports that cannot be built are skipped
    pub fn from_config(configs: &[PortConfig]) -> Self {
        let registry = Self::new();
        for config in configs {
            match create_port(config) {
                Ok(port) => registry.insert(port),
                Err(e) => warn!(port = %config.system_name(), error = %e, "Skipping port"),
            }
        }
        registry
    }

    /// Add serial ports the OS reports that are not configured yet
    #[cfg(feature = "serial")]
    pub fn scan_serial_ports(&self) {
        for name in serial::SerialPort::available() {
            if self.get(&name).is_some() {
                continue;
            }
            let config = crate::config::SerialPortConfig::named(&name);
            self.insert(Arc::new(serial::SerialPort::new(&config)));
        }
    }

    pub fn insert(&self, port: Arc<dyn Port>) {
        self.ports.write().insert(port.system_name(), port);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Port>> {
        self.ports.read().get(name).cloned()
    }

    /// System names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.ports.read().keys().cloned().collect()
    }
}

/// Read one answer: wait up to `timeout` for the first bytes, then keep
/// reading until the line stays quiet for `gap`
pub(crate) fn read_frame<R, F>(
    reader: &mut R,
    mut set_timeout: F,
    timeout: Duration,
    gap: Duration,
) -> Result<Vec<u8>, TransportError>
where
    R: Read + ?Sized,
    F: FnMut(&mut R, Duration) -> io::Result<()>,
{
    let min = Duration::from_millis(1);
    set_timeout(reader, timeout.max(min))
        .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;

    let mut answer = Vec::new();
    let mut buf = [0u8; 512];
    loop {
        match reader.read(&mut buf) {
            Ok(0) if answer.is_empty() => return Err(TransportError::ConnectionClosed),
            Ok(0) => break,
            Ok(n) => {
                answer.extend_from_slice(&buf[..n]);
                set_timeout(reader, gap.max(min))
                    .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
            }
            Err(e)
                if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock =>
            {
                if answer.is_empty() {
                    return Err(TransportError::Timeout(format!(
                        "no answer within {:?}",
                        timeout
                    )));
                }
                break;
            }
            Err(e) => return Err(TransportError::ReceiveFailed(e.to_string())),
        }
    }

    Ok(answer)
}
