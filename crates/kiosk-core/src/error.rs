//! Common error types for device management

use thiserror::Error;

/// Result type for device manager and loader operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors that can occur while acquiring, configuring or releasing devices
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// System resource (serial port name, etc.) is held by another device
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Loader does not know the requested driver
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    /// Plugin exists but does not expose the device capability set
    #[error("Plugin is not a device: {0}")]
    NotADevice(String),

    /// Required resource is already being acquired further up the chain
    #[error("Cyclic dependency on required resource: {0}")]
    CyclicDependency(String),

    /// Required resource could not be acquired
    #[error("Failed to acquire required resource {path}: {source}")]
    RequiredResource {
        /// Driver path of the required resource
        path: String,
        /// Underlying failure
        source: Box<DeviceError>,
    },

    /// Handle does not belong to an acquired device
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Configuration could not be applied
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl DeviceError {
    /// Innermost error of a required-resource chain
    pub fn root_cause(&self) -> &DeviceError {
        match self {
            DeviceError::RequiredResource { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
