//! kiosk-hw - Peripheral drivers for payment kiosks
//!
//! This crate provides the statically linked drivers the device manager
//! instantiates through [`StaticPluginLoader`]: port resources, the
//! protocol command engine and the fiscal registrator / bill acceptor
//! families built on it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   StaticPluginLoader                        │
//! │  Implements PluginLoader trait                              │
//! │                                                             │
//! │  ┌─────────────┐  ┌──────────────┐  ┌────────────────────┐  │
//! │  │ DriverKind  │  │ ConfigStore  │  │ PortRegistry       │  │
//! │  │ (schemas)   │  │ (TOML file)  │  │ (COM/mock ports)   │  │
//! │  └─────────────┘  └──────────────┘  └────────────────────┘  │
//! │                          │                                  │
//! │        ┌─────────────────┼──────────────────┐               │
//! │        │                 │                  │               │
//! │  ┌─────┴──────┐  ┌───────┴────────┐  ┌──────┴──────────┐    │
//! │  │ComPort/Tcp │  │FiscalRegistrator│ │ CcnetValidator  │    │
//! │  │ (resource) │  │Shtrih/Prim/AFP  │ │ (bill acceptor) │    │
//! │  └─────┬──────┘  └───────┬────────┘  └──────┬──────────┘    │
//! │        │                 └────────┬─────────┘               │
//! │        │                   ┌──────┴────────┐                │
//! │        │                   │ CommandEngine │                │
//! │        │                   │ (compensation)│                │
//! │        │                   └──────┬────────┘                │
//! │        └──────────────────────────┤                         │
//! │                            ┌──────┴──────┐                  │
//! │                            │  dyn Port   │                  │
//! │                            │(serial/tcp) │                  │
//! │                            └─────────────┘                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod drivers;
pub mod error;
pub mod loader;
pub mod protocol;
pub mod transport;

pub use config::{LoaderConfig, PortConfig};
pub use drivers::{
    CcnetValidator, ComPortDevice, FiscalProtocol, FiscalRegistrator, FrState, TcpPortDevice,
};
pub use error::{AnswerError, CommandError, ConfigError, ErrorCode};
pub use loader::{ConfigStore, DriverKind, StaticPluginLoader};
pub use protocol::{CommandEngine, Protocol};
pub use transport::{create_port, MockPort, PortRegistry, TcpPort};
