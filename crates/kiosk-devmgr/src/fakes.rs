//! Scripted loader and devices for manager tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use kiosk_core::params::{driver_path_of, keys, value_to_string};
use kiosk_core::{
    Config, ConfigurationChangedHandler, DetectPriority, DetectingIterator, Device, DeviceBase,
    DeviceId, DriverDescriptor, Existence, ParameterSpec, ParameterType, Plugin, PluginLoader,
};
use parking_lot::Mutex;
use serde_json::Value;

pub(crate) const COM: &str = "Common.Driver.IOPort.COM.System";
pub(crate) const TCP: &str = "Common.Driver.IOPort.TCP.System";

/// Probe script: `steps` candidates, `find` succeeds at the 1-based steps
/// in `matches`, optionally only on the resource bound to `on`
#[derive(Debug, Clone)]
pub(crate) struct Probe {
    pub(crate) steps: usize,
    pub(crate) matches: Vec<usize>,
    pub(crate) on: Option<String>,
    /// Time every `find` takes, standing in for port I/O
    pub(crate) delay: Duration,
}

impl Probe {
    pub(crate) fn never(steps: usize) -> Self {
        Self::at_steps(steps, &[])
    }

    pub(crate) fn at(steps: usize, step: usize) -> Self {
        Self::at_steps(steps, &[step])
    }

    pub(crate) fn at_steps(steps: usize, matches: &[usize]) -> Self {
        Self {
            steps,
            matches: matches.to_vec(),
            on: None,
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn on(mut self, system_name: &str) -> Self {
        self.on = Some(system_name.to_string());
        self
    }

    pub(crate) fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

pub(crate) fn com_port(names: &[&str]) -> Vec<ParameterSpec> {
    vec![ParameterSpec::new(keys::SYSTEM_NAME, ParameterType::String)
        .with_possible_values(names.iter().copied())]
}

pub(crate) fn tcp_port() -> Vec<ParameterSpec> {
    vec![
        ParameterSpec::string(keys::REMOTE_IP, "192.168.0.10"),
        ParameterSpec::new(keys::REMOTE_PORT, ParameterType::Int).with_default(Value::from(5000)),
    ]
}

pub(crate) fn riding(resource: &str, priority: DetectPriority, existence: Existence) -> Vec<ParameterSpec> {
    let mut parameters = simple(priority, existence);
    parameters.insert(0, ParameterSpec::string(keys::REQUIRED_RESOURCE, resource));
    parameters.push(ParameterSpec::new(keys::BAUD_RATE, ParameterType::Int).with_default(Value::from(9600)));
    parameters
}

pub(crate) fn simple(priority: DetectPriority, existence: Existence) -> Vec<ParameterSpec> {
    vec![
        ParameterSpec::new(keys::MODEL_NAME, ParameterType::String)
            .with_possible_values(["Model A", "Model B"]),
        ParameterSpec::string(keys::DETECT_PRIORITY, priority.as_str()),
        ParameterSpec::string(keys::EXISTENCE, existence.as_str()),
    ]
}

pub(crate) struct FakeDevice {
    base: DeviceBase,
    probe: Option<FakeIterator>,
}

struct FakeIterator {
    probe: Probe,
    position: AtomicUsize,
    base_required: Arc<Mutex<Option<Arc<dyn Device>>>>,
}

impl DetectingIterator for FakeIterator {
    fn move_next(&self) -> bool {
        let position = self.position.load(Ordering::SeqCst);
        if position >= self.probe.steps {
            return false;
        }
        self.position.store(position + 1, Ordering::SeqCst);
        true
    }

    fn find(&self) -> bool {
        if !self.probe.delay.is_zero() {
            thread::sleep(self.probe.delay);
        }
        if !self.probe.matches.contains(&self.position.load(Ordering::SeqCst)) {
            return false;
        }
        match &self.probe.on {
            None => true,
            Some(name) => self.base_required.lock().as_ref().is_some_and(|resource| {
                resource
                    .configuration()
                    .get(keys::SYSTEM_NAME)
                    .map(value_to_string)
                    .as_deref()
                    == Some(name.as_str())
            }),
        }
    }
}

impl Plugin for FakeDevice {
    fn plugin_path(&self) -> &str {
        self.base.path()
    }

    fn as_device(self: Arc<Self>) -> Option<Arc<dyn Device>> {
        Some(self)
    }
}

impl Device for FakeDevice {
    fn id(&self) -> DeviceId {
        self.base.id()
    }

    fn configuration(&self) -> Config {
        self.base.configuration()
    }

    fn set_configuration(&self, config: &Config) {
        self.base.merge_configuration(config);
    }

    fn detecting_iterator(&self) -> Option<&dyn DetectingIterator> {
        self.probe.as_ref().map(|p| p as &dyn DetectingIterator)
    }

    fn release(&self) -> bool {
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

    fn attach_required_device(&self, device: Arc<dyn Device>) {
        if let Some(probe) = &self.probe {
            *probe.base_required.lock() = Some(Arc::clone(&device));
        }
        self.base.attach_required(device);
    }
}

impl FakeDevice {
    /// Simulate the device discovering a setting on its own
    pub(crate) fn discover(&self, key: &str, value: Value) {
        self.base.update(key, value);
    }
}

struct PlainPlugin(String);

impl Plugin for PlainPlugin {
    fn plugin_path(&self) -> &str {
        &self.0
    }

    fn as_device(self: Arc<Self>) -> Option<Arc<dyn Device>> {
        None
    }
}

#[derive(Default)]
pub(crate) struct FakeLoader {
    drivers: Vec<DriverDescriptor>,
    probes: HashMap<String, Probe>,
    plain: HashSet<String>,
    pub(crate) store: Mutex<HashMap<String, Config>>,
    pub(crate) created: AtomicUsize,
    pub(crate) destroyed: AtomicUsize,
    pub(crate) devices: Mutex<Vec<Arc<FakeDevice>>>,
}

impl FakeLoader {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn driver(mut self, path: &str, parameters: Vec<ParameterSpec>) -> Self {
        self.drivers.push(DriverDescriptor::new(path, parameters));
        self
    }

    pub(crate) fn probe(mut self, path: &str, probe: Probe) -> Self {
        self.probes.insert(path.to_string(), probe);
        self
    }

    pub(crate) fn plain(mut self, path: &str) -> Self {
        self.plain.insert(path.to_string());
        self.drivers.push(DriverDescriptor::new(path, Vec::new()));
        self
    }

    pub(crate) fn with_config(self, config_path: &str, config: Value) -> Self {
        self.store
            .lock()
            .insert(config_path.to_string(), config.as_object().cloned().unwrap_or_default());
        self
    }

    /// Plugins created and not yet destroyed
    pub(crate) fn live(&self) -> usize {
        self.created.load(Ordering::SeqCst) - self.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn device(&self, id: DeviceId) -> Option<Arc<FakeDevice>> {
        self.devices.lock().iter().find(|d| d.id() == id).cloned()
    }
}

impl PluginLoader for FakeLoader {
    fn plugin_list(&self, filter: &str) -> Vec<String> {
        self.drivers
            .iter()
            .map(|d| d.path.clone())
            .filter(|p| p.contains(filter))
            .collect()
    }

    fn parameters_description(&self, path: &str) -> Option<Vec<ParameterSpec>> {
        self.drivers
            .iter()
            .find(|d| d.path == path)
            .map(|d| d.parameters.clone())
    }

    fn create_plugin(&self, instance_path: &str, config_path: &str) -> Option<Arc<dyn Plugin>> {
        let path = driver_path_of(instance_path);
        let descriptor = self.drivers.iter().find(|d| d.path == path)?;
        self.created.fetch_add(1, Ordering::SeqCst);
        if self.plain.contains(path) {
            return Some(Arc::new(PlainPlugin(path.to_string())));
        }

        let mut config = descriptor.default_configuration();
        config.extend(self.load_configuration(config_path));
        let probe = self.probes.get(path).map(|probe| FakeIterator {
            probe: probe.clone(),
            position: AtomicUsize::new(0),
            base_required: Arc::new(Mutex::new(None)),
        });
        let device = Arc::new(FakeDevice {
            base: DeviceBase::new(path, config),
            probe,
        });
        self.devices.lock().push(Arc::clone(&device));
        Some(device)
    }

    fn destroy_plugin(&self, _plugin: &Arc<dyn Plugin>) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }

    fn load_configuration(&self, config_path: &str) -> Config {
        self.store.lock().get(config_path).cloned().unwrap_or_default()
    }

    fn save_configuration(&self, config_path: &str, config: &Config) {
        self.store
            .lock()
            .insert(config_path.to_string(), config.clone());
    }
}
