//! TCP port for network-attached devices

use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use kiosk_core::{Port, PortSettings, TransportError};
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use super::read_frame;
use crate::config::TcpPortConfig;

pub struct TcpPort {
    host: String,
    port: u16,
    connect_timeout: Duration,
    inter_byte_gap: Duration,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpPort {
    pub fn new(config: &TcpPortConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            inter_byte_gap: Duration::from_millis(config.inter_byte_gap_ms),
            stream: Mutex::new(None),
        }
    }

    fn address(&self) -> Result<SocketAddr, TransportError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| TransportError::InvalidConfig(format!("{}:{}: {}", self.host, self.port, e)))
    }
}

impl Port for TcpPort {
    fn system_name(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn open(&self) -> Result<(), TransportError> {
        let mut guard = self.stream.lock();
        if guard.is_some() {
            return Ok(());
        }

        let addr = self.address()?;
        info!(%addr, "Connecting TCP port");
        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", addr, e)))?;
        let _ = stream.set_nodelay(true);
        *guard = Some(stream);
        Ok(())
    }

    fn close(&self) {
        if let Some(stream) = self.stream.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!(port = %self.system_name(), "TCP port closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.lock().is_some()
    }

    fn apply_settings(&self, _settings: PortSettings) -> Result<(), TransportError> {
        Ok(())
    }

    fn send_receive(&self, request: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut guard = self.stream.lock();
        let stream = guard.as_mut().ok_or(TransportError::ConnectionClosed)?;

        trace!(port = %self.host, request = %hex::encode(request), "TCP TX");
        stream
            .write_all(request)
            .and_then(|_| stream.flush())
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let answer = read_frame(
            stream,
            |s, t| s.set_read_timeout(Some(t)),
            timeout,
            self.inter_byte_gap,
        )?;
        trace!(port = %self.host, answer = %hex::encode(&answer), "TCP RX");
        Ok(answer)
    }
}
