//! I/O channel boundary between drivers and the physical link

use std::time::Duration;

use thiserror::Error;

/// Transport layer errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport not supported: {0}")]
    Unsupported(String),
}

/// Line settings a driver may apply while probing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSettings {
    pub baud_rate: u32,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self { baud_rate: 9600 }
    }
}

/// Blocking request/response channel.
///
/// Implementations serialise access internally; callers still keep at most
/// one command in flight per port.
pub trait Port: Send + Sync {
    /// OS-level name of the channel (`COM3`, `10.0.0.5:5000`, ...)
    fn system_name(&self) -> String;

    /// Open the channel if it is not already open
    fn open(&self) -> Result<(), TransportError>;

    /// Close the channel
    fn close(&self);

    fn is_open(&self) -> bool;

    /// Apply line settings; ignored by channels without them
    fn apply_settings(&self, settings: PortSettings) -> Result<(), TransportError>;

    /// Write `request` and read one answer within `timeout`
    fn send_receive(&self, request: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError>;
}
