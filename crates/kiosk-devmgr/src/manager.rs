//! Device Manager - Acquisition, release and configuration of devices
//!
//! The manager owns every acquired device together with the edges to the
//! resources they ride and the pool of system names (serial port names,
//! etc.) that at most one device may hold at a time.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use kiosk_core::params::{driver_path_of, keys, searching_type, value_to_string};
use kiosk_core::{
    Config, Device, DeviceError, DeviceId, DeviceResult, DeviceState, DriverDescriptor,
    DriverPath, ParameterSpec, Plugin, PluginLoader, DRIVER_FILTER,
};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::DeviceManagerConfig;
use crate::naming::{self, Channel};

/// Categories that satisfy each other during detection
const PRINTER_CATEGORIES: [&str; 3] = ["Printer", "DocumentPrinter", "FiscalRegistrator"];

/// Index scope shared by every USB device
const USB_LOG_SCOPE: &str = "USB";

/// Acquired device as seen by callers
#[derive(Clone)]
pub struct DeviceHandle {
    id: DeviceId,
    instance_path: String,
    config_path: String,
    plugin: Arc<dyn Plugin>,
    device: Arc<dyn Device>,
}

impl DeviceHandle {
    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn instance_path(&self) -> &str {
        &self.instance_path
    }

    pub fn driver_path(&self) -> &str {
        driver_path_of(&self.instance_path)
    }

    pub fn config_path(&self) -> &str {
        &self.config_path
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }
}

impl PartialEq for DeviceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("id", &self.id)
            .field("instance_path", &self.instance_path)
            .field("config_path", &self.config_path)
            .finish()
    }
}

// =============================================================================
// Tables
// =============================================================================

pub(crate) struct DriverInfo {
    pub(crate) descriptor: DriverDescriptor,
    pub(crate) required_resource: String,
    /// Candidate system names; `None` for drivers that bind none
    pub(crate) system_names: Option<Vec<String>>,
    pub(crate) models: Vec<String>,
}

impl DriverInfo {
    pub(crate) fn binds_system_name(&self) -> bool {
        self.system_names.is_some()
    }
}

pub(crate) struct ManagedDevice {
    pub(crate) handle: DeviceHandle,
    pub(crate) system_name: Option<String>,
    pub(crate) state: DeviceState,
    pub(crate) log_name: String,
}

#[derive(Default)]
pub(crate) struct ManagerTables {
    /// Driver paths in loader order
    pub(crate) drivers: Vec<String>,
    pub(crate) driver_info: HashMap<String, DriverInfo>,
    pub(crate) free_names: BTreeSet<String>,
    pub(crate) devices: HashMap<DeviceId, ManagedDevice>,
    /// Device -> required device it owns
    pub(crate) dependencies: HashMap<DeviceId, DeviceId>,
    /// Categories satisfied by the running detection
    pub(crate) detected: HashSet<String>,
    /// (device, detecting) -> (index scope, log index)
    log_indexes: HashMap<(DeviceId, bool), (String, usize)>,
}

impl ManagerTables {
    pub(crate) fn is_detected(&self, driver_path: &str) -> bool {
        self.detected
            .contains(DriverPath::new(driver_path).category())
    }

    pub(crate) fn mark_detected(&mut self, driver_path: &str) {
        let category = DriverPath::new(driver_path).category();
        if PRINTER_CATEGORIES.contains(&category) {
            self.detected
                .extend(PRINTER_CATEGORIES.iter().map(|c| c.to_string()));
        } else {
            self.detected.insert(category.to_string());
        }
    }

    /// Mark the category of `driver_path` unless another match already did
    pub(crate) fn claim_detected(&mut self, driver_path: &str) -> bool {
        if self.is_detected(driver_path) {
            return false;
        }
        self.mark_detected(driver_path);
        true
    }

    fn binds_system_name(&self, driver_path: &str) -> bool {
        self.driver_info
            .get(driver_path)
            .is_some_and(DriverInfo::binds_system_name)
    }

    fn log_index(&mut self, id: DeviceId, detecting: bool, scope: &str, usb: bool) -> usize {
        if !usb {
            if let Some((_, index)) = self.log_indexes.get(&(id, detecting)) {
                return *index;
            }
        }
        let used = self
            .log_indexes
            .iter()
            .filter(|((other, d), (s, _))| *other != id && *d == detecting && s == scope)
            .map(|(_, (_, index))| *index);
        let index = naming::lowest_free_index(used);
        self.log_indexes
            .insert((id, detecting), (scope.to_string(), index));
        index
    }
}

/// Parameters of one instantiation
pub(crate) struct Request<'a> {
    pub(crate) instance_path: &'a str,
    pub(crate) config_path: &'a str,
    /// Applied on top of the persisted configuration
    pub(crate) overrides: Config,
    pub(crate) detecting: bool,
    /// Resource to ride instead of acquiring one
    pub(crate) resource: Option<&'a DeviceHandle>,
}

// =============================================================================
// Device manager
// =============================================================================

/// Device manager
///
/// Acquires devices through the plugin loader, wires each one to the
/// resource it requires and runs auto-detection. All tables live behind a
/// single mutex; detection is cancelled through a cooperative stop flag.
pub struct DeviceManager {
    pub(crate) loader: Arc<dyn PluginLoader>,
    pub(crate) config: DeviceManagerConfig,
    pub(crate) tables: Mutex<ManagerTables>,
    pub(crate) stop: AtomicBool,
}

impl DeviceManager {
    pub fn new(loader: Arc<dyn PluginLoader>, config: DeviceManagerConfig) -> Self {
        Self {
            loader,
            config,
            tables: Mutex::new(ManagerTables::default()),
            stop: AtomicBool::new(true),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.config.pool_size.max(1)
    }

    /// Build the driver tables from the loader; returns the driver count
    pub fn initialize(&self) -> usize {
        let mut drivers = Vec::new();
        let mut driver_info = HashMap::new();
        let mut free_names = BTreeSet::new();

        for path in self.loader.plugin_list(DRIVER_FILTER) {
            let Some(descriptor) = self.loader.descriptor(&path) else {
                warn!(driver = %path, "Driver has no parameter description");
                continue;
            };

            let system_names = descriptor.system_names().map(|names| {
                if names.is_empty() {
                    vec![String::new()]
                } else {
                    names
                }
            });
            if let Some(names) = &system_names {
                free_names.extend(names.iter().filter(|n| !n.is_empty()).cloned());
            }

            debug!(
                driver = %path,
                required_resource = %descriptor.required_resource(),
                system_names = ?system_names,
                "Registered driver"
            );
            driver_info.insert(
                path.clone(),
                DriverInfo {
                    required_resource: descriptor.required_resource(),
                    system_names,
                    models: descriptor.models(),
                    descriptor,
                },
            );
            drivers.push(path);
        }

        let count = drivers.len();
        let mut tables = self.tables.lock();
        tables.drivers = drivers;
        tables.driver_info = driver_info;
        tables.free_names = free_names;

        info!(drivers = count, pool_size = self.pool_size(), "Device manager initialized");
        count
    }

    /// Acquire a device and, recursively, the resource it requires
    ///
    /// An empty `config_path` falls back to the instance path. Failure is
    /// total: nothing created on the way stays acquired.
    pub fn acquire_device(&self, instance_path: &str, config_path: &str) -> DeviceResult<DeviceHandle> {
        let config_path = if config_path.is_empty() {
            instance_path
        } else {
            config_path
        };

        let handle = self.instantiate(
            Request {
                instance_path,
                config_path,
                overrides: Config::new(),
                detecting: false,
                resource: None,
            },
            &mut Vec::new(),
        )?;

        // System resources take the name of the device riding them
        if !self.tables.lock().binds_system_name(handle.driver_path()) {
            self.assign_log_name(&handle, false);
        }

        info!(
            device = %handle.instance_path(),
            config_path = %handle.config_path(),
            log_name = %handle.device().log_name(),
            "Device acquired"
        );
        Ok(handle)
    }

    pub(crate) fn instantiate(
        &self,
        request: Request<'_>,
        chain: &mut Vec<String>,
    ) -> DeviceResult<DeviceHandle> {
        let driver_path = driver_path_of(request.instance_path).to_string();
        let (required_resource, binds_system_name) = {
            let tables = self.tables.lock();
            let info = tables
                .driver_info
                .get(&driver_path)
                .ok_or_else(|| DeviceError::PluginNotFound(driver_path.clone()))?;
            (info.required_resource.clone(), info.binds_system_name())
        };

        let plugin = self
            .loader
            .create_plugin(request.instance_path, request.config_path)
            .ok_or_else(|| DeviceError::PluginNotFound(request.instance_path.to_string()))?;
        let Some(device) = Arc::clone(&plugin).as_device() else {
            warn!(device = %request.instance_path, "Plugin is not a device");
            self.loader.destroy_plugin(&plugin);
            return Err(DeviceError::NotADevice(request.instance_path.to_string()));
        };

        let mut config = self.loader.load_configuration(request.config_path);
        config.extend(request.overrides);
        config.remove(keys::REQUIRED_DEVICE);
        let searching = if request.detecting {
            searching_type::AUTO_DETECTING
        } else {
            searching_type::LOADING
        };
        config.insert(keys::SEARCHING_TYPE.to_string(), Value::from(searching));
        device.set_configuration(&config);

        let handle = DeviceHandle {
            id: device.id(),
            instance_path: request.instance_path.to_string(),
            config_path: request.config_path.to_string(),
            plugin,
            device,
        };

        let system_name = if binds_system_name {
            match self.bind_system_name(&handle) {
                Ok(name) => name,
                Err(e) => {
                    self.loader.destroy_plugin(&handle.plugin);
                    return Err(e);
                }
            }
        } else {
            None
        };

        let mut dependency = None;
        if !required_resource.is_empty() {
            let resource = match request.resource {
                Some(resource) => Ok(resource.clone()),
                None => self.acquire_resource(&handle, &required_resource, request.detecting, chain),
            };

            match resource {
                Ok(resource) => {
                    handle
                        .device()
                        .attach_required_device(Arc::clone(resource.device()));
                    let mut link = Config::new();
                    link.insert(
                        keys::REQUIRED_DEVICE.to_string(),
                        Value::from(resource.id().to_string()),
                    );
                    handle.device().set_configuration(&link);
                    if request.resource.is_none() {
                        dependency = Some(resource.id());
                    }
                }
                Err(e) => {
                    warn!(
                        device = %handle.instance_path(),
                        resource = %required_resource,
                        error = %e,
                        "Failed to acquire required resource"
                    );
                    self.loader.destroy_plugin(&handle.plugin);
                    if let Some(name) = system_name {
                        self.tables.lock().free_names.insert(name);
                    }
                    return Err(DeviceError::RequiredResource {
                        path: required_resource,
                        source: Box::new(e),
                    });
                }
            }
        }

        let loader = Arc::clone(&self.loader);
        let config_path = handle.config_path.clone();
        handle
            .device()
            .subscribe_configuration_changed(Arc::new(move |config: &Config| {
                loader.save_configuration(&config_path, &persisted(config));
            }));

        let mut tables = self.tables.lock();
        if let Some(dependency) = dependency {
            tables.dependencies.insert(handle.id(), dependency);
        }
        tables.devices.insert(
            handle.id(),
            ManagedDevice {
                handle: handle.clone(),
                system_name,
                state: if request.detecting {
                    DeviceState::Detecting
                } else {
                    DeviceState::Acquired
                },
                log_name: String::new(),
            },
        );
        Ok(handle)
    }

    /// Take the system name the device is configured with out of the pool
    fn bind_system_name(&self, handle: &DeviceHandle) -> DeviceResult<Option<String>> {
        let name = handle
            .device()
            .configuration()
            .get(keys::SYSTEM_NAME)
            .map(value_to_string)
            .unwrap_or_default();
        if name.is_empty() {
            return Ok(None);
        }

        let mut tables = self.tables.lock();
        let known = tables
            .driver_info
            .get(handle.driver_path())
            .and_then(|info| info.system_names.as_ref())
            .is_some_and(|names| names.contains(&name));

        if !known {
            warn!(system_name = %name, driver = %handle.driver_path(), "Registering unknown system name");
            if let Some(names) = tables
                .driver_info
                .get_mut(handle.driver_path())
                .and_then(|info| info.system_names.as_mut())
            {
                names.push(name.clone());
            }
        } else if !tables.free_names.remove(&name) {
            warn!(system_name = %name, "Required system name is not available");
            return Err(DeviceError::ResourceUnavailable(name));
        }
        Ok(Some(name))
    }

    fn acquire_resource(
        &self,
        dependent: &DeviceHandle,
        default_path: &str,
        detecting: bool,
        chain: &mut Vec<String>,
    ) -> DeviceResult<DeviceHandle> {
        let config = dependent.device().configuration();
        let resource_path = config
            .get(keys::REQUIRED_RESOURCE)
            .map(value_to_string)
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| default_path.to_string());
        let resource_driver = driver_path_of(&resource_path);

        chain.push(dependent.driver_path().to_string());
        if chain.iter().any(|ancestor| ancestor == resource_driver) {
            chain.pop();
            return Err(DeviceError::CyclicDependency(resource_driver.to_string()));
        }

        let resource_keys: HashSet<String> = self
            .driver_parameters(resource_driver)
            .into_iter()
            .map(|p| p.name)
            .collect();
        let overrides: Config = config
            .into_iter()
            .filter(|(key, _)| resource_keys.contains(key) && !is_link_key(key))
            .collect();

        let result = self.instantiate(
            Request {
                instance_path: &resource_path,
                config_path: &resource_path,
                overrides,
                detecting,
                resource: None,
            },
            chain,
        );
        chain.pop();
        result
    }

    /// Release a device and every dependency it alone owns
    ///
    /// Returns `false` for a handle that is not acquired.
    pub fn release_device(&self, handle: &DeviceHandle) -> bool {
        let Some(entry) = self.tables.lock().devices.remove(&handle.id()) else {
            return false;
        };
        self.release_entry(entry);
        true
    }

    fn release_entry(&self, entry: ManagedDevice) {
        let handle = entry.handle;
        handle.device().release();
        self.loader.destroy_plugin(&handle.plugin);

        let orphan = {
            let mut tables = self.tables.lock();
            if let Some(name) = entry.system_name {
                tables.free_names.insert(name);
            }
            let id = handle.id();
            tables.log_indexes.retain(|(device, _), _| *device != id);
            match tables.dependencies.remove(&id) {
                Some(dependency) if !tables.dependencies.values().any(|d| *d == dependency) => {
                    tables.devices.remove(&dependency)
                }
                _ => None,
            }
        };

        debug!(device = %handle.instance_path(), log_name = %entry.log_name, "Device released");
        if let Some(orphan) = orphan {
            self.release_entry(orphan);
        }
    }

    /// Release every device no other device depends on
    pub fn release_all(&self) -> usize {
        let roots: Vec<DeviceHandle> = {
            let tables = self.tables.lock();
            let owned: HashSet<DeviceId> = tables.dependencies.values().copied().collect();
            tables
                .devices
                .values()
                .filter(|entry| !owned.contains(&entry.handle.id()))
                .map(|entry| entry.handle.clone())
                .collect()
        };
        roots.iter().filter(|h| self.release_device(h)).count()
    }

    /// Apply configuration, writing resource keys through to the dependency
    pub fn set_device_configuration(&self, handle: &DeviceHandle, config: &Config) -> DeviceResult<()> {
        self.apply_configuration(handle.id(), config)?;
        if self.tables.lock().binds_system_name(handle.driver_path()) {
            return Ok(());
        }
        self.assign_log_name(handle, false);
        Ok(())
    }

    fn apply_configuration(&self, id: DeviceId, config: &Config) -> DeviceResult<()> {
        let (handle, dependency) = {
            let mut tables = self.tables.lock();
            let binds = {
                let entry = tables
                    .devices
                    .get(&id)
                    .ok_or_else(|| DeviceError::UnknownDevice(id.to_string()))?;
                tables.binds_system_name(entry.handle.driver_path())
            };

            if binds {
                if let Some(new_name) = config.get(keys::SYSTEM_NAME).map(value_to_string) {
                    let current = tables.devices.get(&id).and_then(|e| e.system_name.clone());
                    if current.as_deref().unwrap_or_default() != new_name {
                        if !new_name.is_empty() && !tables.free_names.contains(&new_name) {
                            warn!(system_name = %new_name, "Required system name is not available");
                            return Err(DeviceError::ResourceUnavailable(new_name));
                        }
                        if let Some(old) = current {
                            tables.free_names.insert(old);
                        }
                        tables.free_names.remove(&new_name);
                        if let Some(entry) = tables.devices.get_mut(&id) {
                            entry.system_name = (!new_name.is_empty()).then_some(new_name);
                        }
                    }
                }
            }

            let dependency = tables
                .dependencies
                .get(&id)
                .and_then(|dep| tables.devices.get(dep))
                .map(|entry| entry.handle.clone());
            let handle = tables
                .devices
                .get(&id)
                .map(|entry| entry.handle.clone())
                .ok_or_else(|| DeviceError::UnknownDevice(id.to_string()))?;
            (handle, dependency)
        };

        let mut own = config.clone();
        if let Some(dependency) = dependency {
            let resource_keys: HashSet<String> = self
                .driver_parameters(dependency.driver_path())
                .into_iter()
                .map(|p| p.name)
                .collect();
            let resource_config: Config = config
                .iter()
                .filter(|(key, _)| resource_keys.contains(*key) && !is_link_key(key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            own.retain(|key, _| !resource_keys.contains(key));
            if !resource_config.is_empty() {
                self.apply_configuration(dependency.id(), &resource_config)?;
                // The dependent reconnects through the rebound resource
                own.extend(resource_config);
            }
        }

        own.remove(keys::REQUIRED_RESOURCE);
        own.remove(keys::REQUIRED_DEVICE);
        if !own.is_empty() {
            handle.device().set_configuration(&own);
        }
        Ok(())
    }

    /// Configuration restricted to declared keys, merged with the dependency's
    pub fn get_device_configuration(&self, handle: &DeviceHandle) -> DeviceResult<Config> {
        self.collect_configuration(handle.id())
    }

    fn collect_configuration(&self, id: DeviceId) -> DeviceResult<Config> {
        let (handle, declared, dependency) = {
            let tables = self.tables.lock();
            let entry = tables
                .devices
                .get(&id)
                .ok_or_else(|| DeviceError::UnknownDevice(id.to_string()))?;
            let declared: HashSet<String> = tables
                .driver_info
                .get(entry.handle.driver_path())
                .map(|info| info.descriptor.parameter_names().map(str::to_string).collect())
                .unwrap_or_default();
            (entry.handle.clone(), declared, tables.dependencies.get(&id).copied())
        };

        let mut result: Config = handle
            .device()
            .configuration()
            .into_iter()
            .filter(|(key, _)| declared.contains(key) && !is_link_key(key))
            .collect();
        if let Some(dependency) = dependency {
            result.extend(self.collect_configuration(dependency)?);
        }
        Ok(result)
    }

    /// Persist the configuration of a device and of everything it depends on
    pub fn save_device_configuration(&self, handle: &DeviceHandle) -> DeviceResult<()> {
        let mut chain = Vec::new();
        {
            let tables = self.tables.lock();
            let mut id = handle.id();
            loop {
                let entry = tables
                    .devices
                    .get(&id)
                    .ok_or_else(|| DeviceError::UnknownDevice(id.to_string()))?;
                chain.push(entry.handle.clone());
                match tables.dependencies.get(&id) {
                    Some(dependency) => id = *dependency,
                    None => break,
                }
            }
        }

        for device in chain.iter().rev() {
            debug!(device = %device.instance_path(), config_path = %device.config_path(), "Saving configuration");
            self.loader
                .save_configuration(device.config_path(), &persisted(&device.device().configuration()));
        }
        Ok(())
    }

    /// Initialized driver paths
    pub fn driver_list(&self) -> Vec<String> {
        self.tables.lock().drivers.clone()
    }

    /// Parameters of a driver followed by those of its required resources
    pub fn driver_parameters(&self, driver_path: &str) -> Vec<ParameterSpec> {
        let tables = self.tables.lock();
        let mut parameters = Vec::new();
        let mut seen = HashSet::new();
        let mut path = driver_path;
        while seen.insert(path) {
            let Some(info) = tables.driver_info.get(path) else {
                break;
            };
            parameters.extend(info.descriptor.parameters.iter().cloned());
            path = &info.required_resource;
        }
        parameters
    }

    /// Models served by a driver
    pub fn driver_models(&self, driver_path: &str) -> Vec<String> {
        self.tables
            .lock()
            .driver_info
            .get(driver_path)
            .map(|info| info.models.clone())
            .unwrap_or_default()
    }

    pub fn acquired_devices(&self) -> Vec<DeviceHandle> {
        self.tables
            .lock()
            .devices
            .values()
            .map(|entry| entry.handle.clone())
            .collect()
    }

    /// System names of a driver nobody holds
    pub fn free_system_names(&self, driver_path: &str) -> Vec<String> {
        let tables = self.tables.lock();
        tables
            .driver_info
            .get(driver_path)
            .and_then(|info| info.system_names.as_ref())
            .map(|names| {
                names
                    .iter()
                    .filter(|n| !n.is_empty() && tables.free_names.contains(*n))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn device_log_name(&self, handle: &DeviceHandle) -> Option<String> {
        self.tables
            .lock()
            .devices
            .get(&handle.id())
            .map(|entry| entry.log_name.clone())
    }

    /// Lifecycle state; released handles report [`DeviceState::Released`]
    pub fn device_state(&self, handle: &DeviceHandle) -> DeviceState {
        self.tables
            .lock()
            .devices
            .get(&handle.id())
            .map(|entry| entry.state)
            .unwrap_or(DeviceState::Released)
    }

    /// Whether the driver's category was satisfied by the last detection
    pub fn is_detected(&self, driver_path: &str) -> bool {
        self.tables.lock().is_detected(driver_path)
    }

    pub(crate) fn handle_of(&self, id: DeviceId) -> Option<DeviceHandle> {
        self.tables
            .lock()
            .devices
            .get(&id)
            .map(|entry| entry.handle.clone())
    }

    pub(crate) fn set_state(&self, handle: &DeviceHandle, state: DeviceState) {
        if let Some(entry) = self.tables.lock().devices.get_mut(&handle.id()) {
            entry.state = state;
        }
    }

    /// Compute and apply the log-sink name of a device
    ///
    /// The required device the device owns is renamed along with it.
    pub(crate) fn assign_log_name(&self, handle: &DeviceHandle, detecting: bool) -> String {
        let path = DriverPath::new(handle.driver_path());
        let config = handle.device().configuration();

        let (name, dependency) = {
            let mut tables = self.tables.lock();
            let simple = tables
                .driver_info
                .get(path.as_str())
                .map_or(true, |info| info.required_resource.is_empty());
            let dependency = tables
                .dependencies
                .get(&handle.id())
                .and_then(|dep| tables.devices.get(dep))
                .map(|entry| entry.handle.clone());

            let name = if simple {
                let interaction_type = config
                    .get(keys::INTERACTION_TYPE)
                    .map(value_to_string)
                    .unwrap_or_else(|| path.interaction_type().to_string());
                let channel = Channel::from_interaction_type(
                    &interaction_type,
                    config_string(&config, keys::REMOTE_IP),
                    config_string(&config, keys::REMOTE_PORT),
                );
                let scope = if channel.is_usb() {
                    USB_LOG_SCOPE
                } else {
                    path.as_str()
                };
                let index = tables.log_index(handle.id(), detecting, scope, channel.is_usb());
                naming::simple_device_name(path.category(), &channel, index, detecting)
            } else {
                let riding = dependency
                    .as_ref()
                    .map(|resource| resource_address(&resource.device().configuration()));
                naming::bound_device_name(&path, None, riding.as_deref(), detecting)
            };

            for id in std::iter::once(handle.id()).chain(dependency.as_ref().map(|d| d.id())) {
                if let Some(entry) = tables.devices.get_mut(&id) {
                    entry.log_name = name.clone();
                }
            }
            (name, dependency)
        };

        handle.device().set_log_name(&name);
        if let Some(dependency) = dependency {
            dependency.device().set_log_name(&name);
        }
        name
    }

    /// Name a system resource after the name it is bound to
    pub(crate) fn assign_resource_log_name(&self, handle: &DeviceHandle, system_name: &str) {
        let name = naming::bound_device_name(
            &DriverPath::new(handle.driver_path()),
            Some(system_name),
            None,
            true,
        );
        if let Some(entry) = self.tables.lock().devices.get_mut(&handle.id()) {
            entry.log_name = name.clone();
        }
        handle.device().set_log_name(&name);
    }
}

/// Keys the manager maintains itself
fn is_link_key(key: &str) -> bool {
    key == keys::REQUIRED_RESOURCE || key == keys::REQUIRED_DEVICE
}

/// Configuration as written to the store
fn persisted(config: &Config) -> Config {
    let mut config = config.clone();
    config.remove(keys::REQUIRED_DEVICE);
    config.remove(keys::SEARCHING_TYPE);
    config
}

fn config_string(config: &Config, key: &str) -> String {
    config.get(key).map(value_to_string).unwrap_or_default()
}

/// Address of a resource as shown in the names of devices riding it
fn resource_address(config: &Config) -> String {
    let system_name = config_string(config, keys::SYSTEM_NAME);
    if !system_name.is_empty() {
        return system_name;
    }
    let ip = config_string(config, keys::REMOTE_IP);
    if ip.is_empty() {
        return String::new();
    }
    format!("{} port {}", ip, config_string(config, keys::REMOTE_PORT))
}
