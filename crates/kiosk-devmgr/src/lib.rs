//! kiosk-devmgr - Device manager for kiosk peripherals
//!
//! This crate provides the [`DeviceManager`] that acquires devices through a
//! [`PluginLoader`](kiosk_core::PluginLoader), wires them to the system
//! resources they require and auto-detects connected hardware.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         DeviceManager                            │
//! │                                                                  │
//! │  ┌──────────────────────────────────────────────────────────┐    │
//! │  │              Mutex<ManagerTables>                        │    │
//! │  │  - driver schemas, required resources, system names      │    │
//! │  │  - acquired devices, dependency edges, log names         │    │
//! │  │  - categories satisfied by detection                     │    │
//! │  └───────────────────────────┬──────────────────────────────┘    │
//! │                              │                                   │
//! │              ┌───────────────┼───────────────┐                   │
//! │              ▼               ▼               ▼                   │
//! │  ┌────────────────┐  ┌───────────────┐  ┌────────────────────┐   │
//! │  │ Fiscal printer │  │ Bill acceptor │  │ detection workers  │   │
//! │  │   (device)     │  │   (device)    │  │ (std::thread::scope)│  │
//! │  └───────┬────────┘  └───────┬───────┘  └────────────────────┘   │
//! │          ▼                   ▼                                   │
//! │  ┌────────────────┐  ┌───────────────┐                           │
//! │  │ COM3 resource  │  │ COM1 resource │                           │
//! │  └────────────────┘  └───────────────┘                           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use kiosk_devmgr::{DeviceManager, DeviceManagerConfig};
//!
//! let manager = DeviceManager::new(loader, DeviceManagerConfig::default());
//! manager.initialize();
//!
//! let printer = manager.acquire_device("Common.Driver.FiscalRegistrator.COM.Shtrih", "fr0")?;
//! let found = manager.detect("");
//! ```

pub mod config;
mod detection;
mod manager;
pub mod naming;

#[cfg(test)]
pub(crate) mod fakes;

pub use config::DeviceManagerConfig;
pub use manager::{DeviceHandle, DeviceManager};

// Re-export core types for convenience
pub use kiosk_core::{Config, DeviceError, DeviceResult, DeviceState};
