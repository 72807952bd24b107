//! kiosk-core - Core traits and types for kiosk peripheral drivers
//!
//! This crate provides the abstractions shared by the hardware drivers
//! (`kiosk-hw`) and the device manager (`kiosk-devmgr`): the plugin loader
//! contract, the device capability set, the port boundary, driver parameter
//! schemas and status debounce.

pub mod device;
pub mod error;
pub mod params;
pub mod plugin;
pub mod port;
pub mod status;

pub use device::{
    Config, ConfigurationChangedHandler, DetectingIterator, Device, DeviceBase, DeviceId,
    DeviceState, Plugin,
};
pub use error::{DeviceError, DeviceResult};
pub use params::{
    keys, DetectPriority, DriverDescriptor, DriverPath, Existence, ParameterSpec, ParameterType,
};
pub use plugin::{PluginLoader, DRIVER_FILTER};
pub use port::{Port, PortSettings, TransportError};
pub use status::{
    StatusCode, StatusCodeTable, StatusCollection, StatusDebouncer, StatusEvent, StatusHistory,
    WarningLevel,
};
