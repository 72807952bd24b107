//! TCP port resource driver
//!
//! Network devices ride this resource. It binds no system name; the
//! socket address comes from its `remote_ip` / `remote_port` settings.

use std::sync::Arc;

use kiosk_core::{
    keys, Config, ConfigurationChangedHandler, Device, DeviceBase, DeviceId, ParameterSpec,
    ParameterType, Plugin, Port,
};
use parking_lot::Mutex;
use serde_json::Value;

use crate::config::TcpPortConfig;
use crate::transport::TcpPort;

pub const DEFAULT_REMOTE_IP: &str = "192.168.137.111";
pub const DEFAULT_REMOTE_PORT: u16 = 5000;

pub struct TcpPortDevice {
    base: DeviceBase,
    port: Mutex<Option<Arc<dyn Port>>>,
}

impl TcpPortDevice {
    pub fn new(path: &str, config: Config) -> Self {
        Self {
            base: DeviceBase::new(path, config),
            port: Mutex::new(None),
        }
    }

    pub fn parameters() -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::string(keys::REMOTE_IP, DEFAULT_REMOTE_IP),
            ParameterSpec::new(keys::REMOTE_PORT, ParameterType::Int)
                .with_default(Value::from(DEFAULT_REMOTE_PORT)),
        ]
    }

    /// Configured socket address
    pub fn port_config(&self) -> TcpPortConfig {
        let host = self
            .base
            .get_string(keys::REMOTE_IP)
            .unwrap_or_else(|| DEFAULT_REMOTE_IP.to_string());
        let port = self
            .base
            .get_u64(keys::REMOTE_PORT)
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(DEFAULT_REMOTE_PORT);
        TcpPortConfig::new(&host, port)
    }

    fn close(&self) {
        if let Some(port) = self.port.lock().take() {
            port.close();
        }
    }
}

impl Plugin for TcpPortDevice {
    fn plugin_path(&self) -> &str {
        self.base.path()
    }

    fn as_device(self: Arc<Self>) -> Option<Arc<dyn Device>> {
        Some(self)
    }
}

impl Device for TcpPortDevice {
    fn id(&self) -> DeviceId {
        self.base.id()
    }

    fn configuration(&self) -> Config {
        self.base.configuration()
    }

    fn set_configuration(&self, config: &Config) {
        let previous = self.port_config();
        self.base.merge_configuration(config);
        let current = self.port_config();
        if (previous.host, previous.port) != (current.host, current.port) {
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
            *guard = Some(Arc::new(TcpPort::new(&self.port_config())));
        }
        guard.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiosk_core::DriverDescriptor;
    use serde_json::json;

    use crate::drivers::TCP_PORT_PATH;

    #[test]
    fn test_defaults_and_no_system_name() {
        let descriptor = DriverDescriptor::new(TCP_PORT_PATH, TcpPortDevice::parameters());
        assert!(!descriptor.binds_system_name());

        let device = TcpPortDevice::new(TCP_PORT_PATH, descriptor.default_configuration());
        let config = device.port_config();
        assert_eq!((config.host.as_str(), config.port), (DEFAULT_REMOTE_IP, DEFAULT_REMOTE_PORT));
    }

    #[test]
    fn test_port_tracks_address() {
        let device = TcpPortDevice::new(TCP_PORT_PATH, Config::new());
        let settings = json!({ "remote_ip": "10.0.0.5", "remote_port": "5001" });
        device.set_configuration(settings.as_object().unwrap());

        assert_eq!(
            device.port().map(|p| p.system_name()),
            Some("10.0.0.5:5001".to_string())
        );
    }
}
