//! Device capability set
//!
//! A [`Plugin`] is whatever the loader instantiates; a [`Device`] is a plugin
//! that exposes configuration, detection, release and change notification.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::params::{keys, value_to_string};
use crate::port::Port;

/// Device configuration map
pub type Config = serde_json::Map<String, Value>;

/// Callback fired when a device changes its own configuration
pub type ConfigurationChangedHandler = Arc<dyn Fn(&Config) + Send + Sync>;

/// Unique identity of an instantiated device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(Uuid);

impl DeviceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a device instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Unacquired,
    Acquired,
    Detecting,
    Ready,
    Released,
}

/// Anything the plugin loader can instantiate
pub trait Plugin: Send + Sync {
    /// Driver path the instance was created from
    fn plugin_path(&self) -> &str;

    /// Device view of the plugin, if it implements the device capability set
    fn as_device(self: Arc<Self>) -> Option<Arc<dyn Device>>;
}

/// Finite, single-pass probe sequence over candidate addresses/settings
pub trait DetectingIterator: Send + Sync {
    /// Advance to the next candidate; `false` once exhausted
    fn move_next(&self) -> bool;

    /// Probe the current candidate
    fn find(&self) -> bool;
}

/// Device capability set
pub trait Device: Plugin {
    fn id(&self) -> DeviceId;

    fn configuration(&self) -> Config;

    /// Merge `config` into the device configuration
    fn set_configuration(&self, config: &Config);

    /// Probe sequence, for drivers that can be auto-detected
    fn detecting_iterator(&self) -> Option<&dyn DetectingIterator> {
        None
    }

    /// Release hardware held by the device
    fn release(&self) -> bool;

    fn subscribe_configuration_changed(&self, handler: ConfigurationChangedHandler);

    fn log_name(&self) -> String;

    fn set_log_name(&self, name: &str);

    /// Attach the resource device this device communicates through
    fn attach_required_device(&self, _device: Arc<dyn Device>) {}

    /// Channel this device offers to dependents
    fn port(&self) -> Option<Arc<dyn Port>> {
        None
    }
}

/// Shared state most drivers embed
pub struct DeviceBase {
    id: DeviceId,
    path: String,
    config: RwLock<Config>,
    log_name: RwLock<String>,
    handlers: Mutex<Vec<ConfigurationChangedHandler>>,
    required: RwLock<Option<Arc<dyn Device>>>,
}

impl DeviceBase {
    pub fn new(path: &str, config: Config) -> Self {
        Self {
            id: DeviceId::new(),
            path: path.to_string(),
            config: RwLock::new(config),
            log_name: RwLock::new(String::new()),
            handlers: Mutex::new(Vec::new()),
            required: RwLock::new(None),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn configuration(&self) -> Config {
        self.config.read().clone()
    }

    pub fn merge_configuration(&self, config: &Config) {
        let mut current = self.config.write();
        for (key, value) in config {
            current.insert(key.clone(), value.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.config.read().get(key).cloned()
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| value_to_string(&v))
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Store a value the device discovered itself and notify subscribers
    pub fn update(&self, key: &str, value: Value) {
        let snapshot = {
            let mut config = self.config.write();
            if config.get(key) == Some(&value) {
                return;
            }
            config.insert(key.to_string(), value);
            config.clone()
        };
        self.notify(&snapshot);
    }

    pub fn subscribe(&self, handler: ConfigurationChangedHandler) {
        self.handlers.lock().push(handler);
    }

    fn notify(&self, config: &Config) {
        let handlers = self.handlers.lock().clone();
        for handler in handlers {
            handler(config);
        }
    }

    pub fn log_name(&self) -> String {
        self.log_name.read().clone()
    }

    /// Name used in tracing output; falls back to the driver path
    pub fn display_name(&self) -> String {
        let name = self.log_name.read();
        if name.is_empty() {
            self.path.clone()
        } else {
            name.clone()
        }
    }

    pub fn set_log_name(&self, name: &str) {
        *self.log_name.write() = name.to_string();
    }

    pub fn attach_required(&self, device: Arc<dyn Device>) {
        *self.required.write() = Some(device);
    }

    pub fn required_device(&self) -> Option<Arc<dyn Device>> {
        self.required.read().clone()
    }

    /// Port offered by the attached required device
    pub fn required_port(&self) -> Option<Arc<dyn Port>> {
        self.required_device().and_then(|d| d.port())
    }

    /// Forget handlers and the required device
    pub fn clear(&self) {
        self.handlers.lock().clear();
        *self.required.write() = None;
    }

    pub fn is_auto_detecting(&self) -> bool {
        self.get_string(keys::SEARCHING_TYPE).as_deref()
            == Some(crate::params::searching_type::AUTO_DETECTING)
    }
}
