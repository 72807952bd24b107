//! Driver layer errors
//!
//! [`CommandError`] is the taxonomy every protocol command resolves to:
//! transport failures and malformed answers are never recovered by the
//! engine, device failures are what is left after compensation.

use kiosk_core::TransportError;
use thiserror::Error;

/// Device-reported error code
pub type ErrorCode = u8;

/// Outcome of a failed protocol command
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    /// Port closed or no answer
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// Malformed or undersized answer
    #[error("Answer failure: {0}")]
    Answer(#[from] AnswerError),

    /// Request longer than the frame's length byte can carry
    #[error("Request too long: {actual} bytes, frame holds at most {max}")]
    TooLong { max: usize, actual: usize },

    /// Nonzero device error left unresolved
    #[error("Device failure: error 0x{code:02X} ({description})")]
    Device {
        code: ErrorCode,
        description: String,
    },
}

impl CommandError {
    /// Device error code, if the device reported one
    pub fn device_code(&self) -> Option<ErrorCode> {
        match self {
            CommandError::Device { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Structural problems with an answer frame or its fields
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnswerError {
    #[error("Answer too short: {actual} bytes, need at least {expected}")]
    TooShort { expected: usize, actual: usize },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Checksum mismatch: got {actual:#06X}, need {expected:#06X}")]
    Checksum { expected: u16, actual: u16 },

    #[error("Invalid command in answer: {actual}, need {expected}")]
    CommandMismatch { expected: String, actual: String },

    #[error("Wrong quantity of answer parts: {actual}, need {expected}")]
    MissingFields { expected: usize, actual: usize },

    #[error("Answer part [{0}] is empty")]
    EmptyField(usize),

    #[error("Failed to parse answer part [{index}] = {value:?}")]
    InvalidField { index: usize, value: String },
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_code_only_for_device_failures() {
        let device = CommandError::Device {
            code: 0x4E,
            description: "Session exceeded 24 hours".to_string(),
        };
        assert_eq!(device.device_code(), Some(0x4E));
        assert_eq!(
            device.to_string(),
            "Device failure: error 0x4E (Session exceeded 24 hours)"
        );

        let transport: CommandError = TransportError::ConnectionClosed.into();
        assert_eq!(transport.device_code(), None);
    }
}
