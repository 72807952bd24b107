//! COM port resource driver
//!
//! A system device bound to one system name out of the [`PortRegistry`].
//! Dependents reach the port through [`Device::port`].

use std::sync::Arc;

use kiosk_core::{
    keys, Config, ConfigurationChangedHandler, Device, DeviceBase, DeviceId, ParameterSpec,
    ParameterType, Plugin, Port,
};
use parking_lot::Mutex;
use tracing::debug;

use crate::transport::PortRegistry;

pub struct ComPortDevice {
    base: DeviceBase,
    registry: Arc<PortRegistry>,
    port: Mutex<Option<Arc<dyn Port>>>,
}

impl ComPortDevice {
    pub fn new(path: &str, config: Config, registry: Arc<PortRegistry>) -> Self {
        Self {
            base: DeviceBase::new(path, config),
            registry,
            port: Mutex::new(None),
        }
    }

    /// Schema listing every registered port as a candidate system name
    pub fn parameters(registry: &PortRegistry) -> Vec<ParameterSpec> {
        vec![ParameterSpec::new(keys::SYSTEM_NAME, ParameterType::String)
            .with_possible_values(registry.names())]
    }

    pub fn system_name(&self) -> Option<String> {
        self.base
            .get_string(keys::SYSTEM_NAME)
            .filter(|name| !name.is_empty())
    }

    fn close(&self) {
        if let Some(port) = self.port.lock().take() {
            debug!(device = %self.base.display_name(), port = %port.system_name(), "Closing port");
            port.close();
        }
    }
}

impl Plugin for ComPortDevice {
    fn plugin_path(&self) -> &str {
        self.base.path()
    }

    fn as_device(self: Arc<Self>) -> Option<Arc<dyn Device>> {
        Some(self)
    }
}

impl Device for ComPortDevice {
    fn id(&self) -> DeviceId {
        self.base.id()
    }

    fn configuration(&self) -> Config {
        self.base.configuration()
    }

    fn set_configuration(&self, config: &Config) {
        let previous = self.system_name();
        self.base.merge_configuration(config);
        if self.system_name() != previous {
            self.close();
        }
    }

    fn release(&self) -> bool {
        self.close();
        self.base.clear();
        true
    }

    fn subscribe_configuration_changed(&self, handler: ConfigurationChangedHandler) {
        self.base.subscribe(handler);
    }

    fn log_name(&self) -> String {
        self.base.log_name()
    }

    fn set_log_name(&self, name: &str) {
        self.base.set_log_name(name);
    }

    fn port(&self) -> Option<Arc<dyn Port>> {
        let mut guard = self.port.lock();
        if guard.is_none() {
            *guard = self.registry.get(&self.system_name()?);
        }
        guard.clone()
    }
}
