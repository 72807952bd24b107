//! Serial (COM / RS-232 / USB-serial) port using the `serialport` crate

use std::io::Write;
use std::time::Duration;

use kiosk_core::{Port, PortSettings, TransportError};
use parking_lot::Mutex;
use serialport::SerialPort as _;
use tracing::{debug, info, trace};

use super::read_frame;
use crate::config::SerialPortConfig;

pub struct SerialPort {
    name: String,
    path: String,
    settings: Mutex<PortSettings>,
    inter_byte_gap: Duration,
    port: Mutex<Option<Box<dyn serialport::SerialPort>>>,
}

impl SerialPort {
    pub fn new(config: &SerialPortConfig) -> Self {
        Self {
            name: config.name.clone(),
            path: config.path.clone().unwrap_or_else(|| config.name.clone()),
            settings: Mutex::new(PortSettings {
                baud_rate: config.baud_rate,
            }),
            inter_byte_gap: Duration::from_millis(config.inter_byte_gap_ms),
            port: Mutex::new(None),
        }
    }

    /// Serial ports the OS reports
    pub fn available() -> Vec<String> {
        serialport::available_ports()
            .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
            .unwrap_or_default()
    }
}

impl Port for SerialPort {
    fn system_name(&self) -> String {
        self.name.clone()
    }

    fn open(&self) -> Result<(), TransportError> {
        let mut guard = self.port.lock();
        if guard.is_some() {
            return Ok(());
        }

        let baud_rate = self.settings.lock().baud_rate;
        info!(port = %self.name, path = %self.path, baud_rate, "Opening serial port");
        let port = serialport::new(&self.path, baud_rate)
            .flow_control(serialport::FlowControl::None)
            .timeout(self.inter_byte_gap)
            .open()
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", self.path, e)))?;
        *guard = Some(port);
        Ok(())
    }

    fn close(&self) {
        if self.port.lock().take().is_some() {
            debug!(port = %self.name, "Serial port closed");
        }
    }

    fn is_open(&self) -> bool {
        self.port.lock().is_some()
    }

    fn apply_settings(&self, settings: PortSettings) -> Result<(), TransportError> {
        *self.settings.lock() = settings;
        if let Some(port) = self.port.lock().as_mut() {
            port.set_baud_rate(settings.baud_rate)
                .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
        }
        Ok(())
    }

    fn send_receive(&self, request: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut guard = self.port.lock();
        let port = guard.as_mut().ok_or(TransportError::ConnectionClosed)?;

        // Drop stale bytes from a previous, abandoned answer
        let _ = port.clear(serialport::ClearBuffer::Input);

        trace!(port = %self.name, request = %hex::encode(request), "Serial TX");
        port.write_all(request)
            .and_then(|_| port.flush())
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let answer = read_frame(
            port,
            |p, t| p.set_timeout(t).map_err(std::io::Error::from),
            timeout,
            self.inter_byte_gap,
        )?;
        trace!(port = %self.name, answer = %hex::encode(&answer), "Serial RX");
        Ok(answer)
    }
}
