//! Integration test fixtures for the kiosk device stack
//!
//! The tests drive the real [`StaticPluginLoader`] and [`DeviceManager`]
//! over mock ports scripted to answer like the supported devices.
//!
//! # Test Structure
//!
//! - `acquire_test.rs` - dependency wiring, system name contention and reuse
//! - `configuration_test.rs` - configuration round trip and persistence
//! - `detection_test.rs` - detection over scripted ports
//! - `engine_test.rs` - bounded error compensation
//! - `status_test.rs` - status debounce of a polled bill acceptor
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p kiosk-tests
//! ```

use std::sync::Arc;

use kiosk_core::{Config, ParameterSpec, Plugin, PluginLoader, Port};
use kiosk_devmgr::{DeviceManager, DeviceManagerConfig};
use kiosk_hw::drivers::ccnet::{self, CcnetCommand, CcnetProtocol};
use kiosk_hw::drivers::shtrih::{self, ShtrihCommand, ShtrihProtocol};
use kiosk_hw::{ConfigStore, MockPort, PortRegistry, Protocol, StaticPluginLoader};
use parking_lot::Mutex;
use serde_json::Value;

pub use kiosk_hw::drivers::COM_PORT_PATH;

pub const SHTRIH_COM: &str = "Common.Driver.FiscalRegistrator.COM.Shtrih";
pub const PRIM_COM: &str = "Common.Driver.FiscalRegistrator.COM.Prim";
pub const CCNET_COM: &str = "Common.Driver.BillAcceptor.COM.CCNet";

pub const SHTRIH_MODEL: &str = "SHTRIH-MINI-FR-K";
pub const CCNET_PART_NUMBER: &str = "SM-RU1353";

/// Mock port answering the Shtrih identification request
pub fn shtrih_port(name: &str) -> Arc<MockPort> {
    let port = MockPort::new(name);
    let request = ShtrihProtocol::default()
        .encode(ShtrihCommand::GetDeviceType, &[])
        .expect("identification request fits a frame");
    let answer = shtrih::answer_frame(
        ShtrihCommand::GetDeviceType,
        0,
        &shtrih::device_type_payload(SHTRIH_MODEL),
    )
    .expect("identification answer fits a frame");
    port.add_response(request, answer);
    Arc::new(port)
}

/// Mock port answering the CCNet identification request
pub fn ccnet_port(name: &str) -> Arc<MockPort> {
    let port = MockPort::new(name);
    let request = CcnetProtocol
        .encode(CcnetCommand::Identification, &[])
        .expect("identification request fits a frame");
    let answer = ccnet::frame(&ccnet::identification_data(CCNET_PART_NUMBER, "41K000123"))
        .expect("identification answer fits a frame");
    port.add_response(request, answer);
    Arc::new(port)
}

/// Configuration map from a JSON object literal
pub fn config(value: Value) -> Config {
    value.as_object().cloned().unwrap_or_default()
}

// =============================================================================
// Recording loader
// =============================================================================

/// Plugin lifecycle event seen by [`RecordingLoader`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderEvent {
    Created(String),
    Destroyed(String),
}

/// Static loader that records plugin creation and destruction order
pub struct RecordingLoader {
    inner: StaticPluginLoader,
    events: Mutex<Vec<LoaderEvent>>,
}

impl RecordingLoader {
    pub fn new(inner: StaticPluginLoader) -> Self {
        Self {
            inner,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &ConfigStore {
        self.inner.store()
    }

    pub fn events(&self) -> Vec<LoaderEvent> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }
}

impl PluginLoader for RecordingLoader {
    fn plugin_list(&self, filter: &str) -> Vec<String> {
        self.inner.plugin_list(filter)
    }

    fn parameters_description(&self, path: &str) -> Option<Vec<ParameterSpec>> {
        self.inner.parameters_description(path)
    }

    fn create_plugin(&self, instance_path: &str, config_path: &str) -> Option<Arc<dyn Plugin>> {
        let plugin = self.inner.create_plugin(instance_path, config_path)?;
        self.events
            .lock()
            .push(LoaderEvent::Created(plugin.plugin_path().to_string()));
        Some(plugin)
    }

    fn destroy_plugin(&self, plugin: &Arc<dyn Plugin>) {
        self.events
            .lock()
            .push(LoaderEvent::Destroyed(plugin.plugin_path().to_string()));
        self.inner.destroy_plugin(plugin);
    }

    fn load_configuration(&self, config_path: &str) -> Config {
        self.inner.load_configuration(config_path)
    }

    fn save_configuration(&self, config_path: &str, config: &Config) {
        self.inner.save_configuration(config_path, config);
    }
}

// =============================================================================
// Test rig
// =============================================================================

/// Initialized device manager over a set of mock ports
pub struct Rig {
    pub loader: Arc<RecordingLoader>,
    pub manager: DeviceManager,
    pub ports: Vec<Arc<MockPort>>,
}

impl Rig {
    pub fn new(ports: Vec<Arc<MockPort>>) -> Self {
        Self::with_store(ports, ConfigStore::in_memory())
    }

    pub fn with_store(ports: Vec<Arc<MockPort>>, store: ConfigStore) -> Self {
        let registry = PortRegistry::new();
        for port in &ports {
            registry.insert(Arc::clone(port) as Arc<dyn Port>);
        }
        let loader = Arc::new(RecordingLoader::new(StaticPluginLoader::with_registry(
            Arc::new(registry),
            store,
        )));
        let manager = DeviceManager::new(
            Arc::clone(&loader) as Arc<dyn PluginLoader>,
            DeviceManagerConfig::default(),
        );
        manager.initialize();
        Self {
            loader,
            manager,
            ports,
        }
    }

    /// Persist `settings` under `config_path` before acquiring from it
    pub fn store(&self, config_path: &str, settings: Value) {
        self.loader
            .save_configuration(config_path, &config(settings));
    }

    pub fn port(&self, name: &str) -> Option<&Arc<MockPort>> {
        self.ports.iter().find(|port| port.system_name() == name)
    }

    pub fn free_ports(&self) -> Vec<String> {
        self.manager.free_system_names(COM_PORT_PATH)
    }
}
