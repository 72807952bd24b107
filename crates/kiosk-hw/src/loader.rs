//! Static plugin loader
//!
//! The drivers are a closed set of variants ([`DriverKind`]) compiled into
//! the binary. [`StaticPluginLoader`] serves their parameter schemas,
//! builds instances wired to the shared [`PortRegistry`] and persists
//! device configuration through a [`ConfigStore`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiosk_core::params::{driver_path_of, interaction};
use kiosk_core::{Config, DriverDescriptor, ParameterSpec, Plugin, PluginLoader};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::LoaderConfig;
use crate::drivers::afp::AfpFr;
use crate::drivers::prim::PrimFr;
use crate::drivers::shtrih::ShtrihFr;
use crate::drivers::{CcnetValidator, ComPortDevice, TcpPortDevice, COM_PORT_PATH, TCP_PORT_PATH};
use crate::error::ConfigError;
use crate::transport::PortRegistry;

/// Driver variants known to the loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverKind {
    ComPort,
    TcpPort,
    ShtrihCom,
    ShtrihTcp,
    PrimCom,
    AfpCom,
    CcnetCom,
}

impl DriverKind {
    /// Every variant, in plugin list order
    pub const ALL: [DriverKind; 7] = [
        DriverKind::ComPort,
        DriverKind::TcpPort,
        DriverKind::ShtrihCom,
        DriverKind::ShtrihTcp,
        DriverKind::PrimCom,
        DriverKind::AfpCom,
        DriverKind::CcnetCom,
    ];

    pub fn path(self) -> &'static str {
        match self {
            DriverKind::ComPort => COM_PORT_PATH,
            DriverKind::TcpPort => TCP_PORT_PATH,
            DriverKind::ShtrihCom => "Common.Driver.FiscalRegistrator.COM.Shtrih",
            DriverKind::ShtrihTcp => "Common.Driver.FiscalRegistrator.TCP.Shtrih",
            DriverKind::PrimCom => "Common.Driver.FiscalRegistrator.COM.Prim",
            DriverKind::AfpCom => "Common.Driver.FiscalRegistrator.COM.AFP",
            DriverKind::CcnetCom => "Common.Driver.BillAcceptor.COM.CCNet",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.path() == path)
    }

    pub fn parameters(self, registry: &PortRegistry) -> Vec<ParameterSpec> {
        match self {
            DriverKind::ComPort => ComPortDevice::parameters(registry),
            DriverKind::TcpPort => TcpPortDevice::parameters(),
            DriverKind::ShtrihCom => ShtrihFr::parameters(interaction::COM),
            DriverKind::ShtrihTcp => ShtrihFr::parameters(interaction::TCP),
            DriverKind::PrimCom => PrimFr::parameters(interaction::COM),
            DriverKind::AfpCom => AfpFr::parameters(interaction::COM),
            DriverKind::CcnetCom => CcnetValidator::parameters(),
        }
    }

    fn create(self, config: Config, registry: &Arc<PortRegistry>) -> Arc<dyn Plugin> {
        let path = self.path();
        match self {
            DriverKind::ComPort => Arc::new(ComPortDevice::new(path, config, Arc::clone(registry))),
            DriverKind::TcpPort => Arc::new(TcpPortDevice::new(path, config)),
            DriverKind::ShtrihCom | DriverKind::ShtrihTcp => Arc::new(ShtrihFr::new(path, config)),
            DriverKind::PrimCom => Arc::new(PrimFr::new(path, config)),
            DriverKind::AfpCom => Arc::new(AfpFr::new(path, config)),
            DriverKind::CcnetCom => Arc::new(CcnetValidator::new(path, config)),
        }
    }
}

// =============================================================================
// Configuration store
// =============================================================================

/// Device configuration keyed by config path, optionally backed by a TOML file
pub struct ConfigStore {
    path: Option<PathBuf>,
    entries: RwLock<BTreeMap<String, Config>>,
}

impl ConfigStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Open a file-backed store; a missing file starts empty
    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        let entries = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?
        } else {
            BTreeMap::new()
        };

        info!(path = %path.display(), entries = entries.len(), "Opened configuration store");
        Ok(Self {
            path: Some(path.to_path_buf()),
            entries: RwLock::new(entries),
        })
    }

    pub fn load(&self, config_path: &str) -> Config {
        self.entries
            .read()
            .get(config_path)
            .cloned()
            .unwrap_or_default()
    }

    /// Store `config` and rewrite the backing file
    pub fn save(&self, config_path: &str, config: &Config) -> Result<(), ConfigError> {
        // TOML has no null
        let config: Config = config
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let mut entries = self.entries.write();
        entries.insert(config_path.to_string(), config);

        if let Some(path) = &self.path {
            let text = toml::to_string(&*entries)?;
            std::fs::write(path, text).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn config_paths(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

// =============================================================================
// Loader
// =============================================================================

pub struct StaticPluginLoader {
    registry: Arc<PortRegistry>,
    store: ConfigStore,
}

impl StaticPluginLoader {
    pub fn new(config: &LoaderConfig) -> Result<Self, ConfigError> {
        let registry = PortRegistry::from_config(&config.ports);
        #[cfg(feature = "serial")]
        if config.scan_serial_ports {
            registry.scan_serial_ports();
        }

        let store = match &config.store_path {
            Some(path) => ConfigStore::open(path)?,
            None => ConfigStore::in_memory(),
        };

        info!(ports = ?registry.names(), "Plugin loader ready");
        Ok(Self::with_registry(Arc::new(registry), store))
    }

    pub fn with_registry(registry: Arc<PortRegistry>, store: ConfigStore) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &Arc<PortRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }
}

impl PluginLoader for StaticPluginLoader {
    fn plugin_list(&self, filter: &str) -> Vec<String> {
        DriverKind::ALL
            .iter()
            .map(|kind| kind.path())
            .filter(|path| path.contains(filter))
            .map(str::to_string)
            .collect()
    }

    fn parameters_description(&self, path: &str) -> Option<Vec<ParameterSpec>> {
        DriverKind::from_path(driver_path_of(path)).map(|kind| kind.parameters(&self.registry))
    }

    fn create_plugin(&self, instance_path: &str, config_path: &str) -> Option<Arc<dyn Plugin>> {
        let Some(kind) = DriverKind::from_path(driver_path_of(instance_path)) else {
            warn!(path = %instance_path, "Unknown plugin");
            return None;
        };

        let mut config =
            DriverDescriptor::new(kind.path(), kind.parameters(&self.registry)).default_configuration();
        for (key, value) in self.store.load(config_path) {
            config.insert(key, value);
        }

        debug!(path = %instance_path, config_path = %config_path, "Creating plugin");
        Some(kind.create(config, &self.registry))
    }

    fn destroy_plugin(&self, plugin: &Arc<dyn Plugin>) {
        debug!(path = %plugin.plugin_path(), "Destroying plugin");
    }

    fn load_configuration(&self, config_path: &str) -> Config {
        self.store.load(config_path)
    }

    fn save_configuration(&self, config_path: &str, config: &Config) {
        if let Err(e) = self.store.save(config_path, config) {
            warn!(config_path = %config_path, error = %e, "Failed to save configuration");
        }
    }
}
