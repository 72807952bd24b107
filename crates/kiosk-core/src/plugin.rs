//! Plugin loader contract

use std::sync::Arc;

use crate::device::{Config, Plugin};
use crate::params::{DriverDescriptor, ParameterSpec};

/// Filter matching every device driver path
pub const DRIVER_FILTER: &str = ".Driver.";

/// Enumerates driver descriptors and instantiates/destroys plugin instances
pub trait PluginLoader: Send + Sync {
    /// Driver paths containing `filter`
    fn plugin_list(&self, filter: &str) -> Vec<String>;

    /// Ordered parameter schema of a driver
    fn parameters_description(&self, path: &str) -> Option<Vec<ParameterSpec>>;

    /// Instantiate a plugin; `config_path` names its persisted configuration
    fn create_plugin(&self, instance_path: &str, config_path: &str) -> Option<Arc<dyn Plugin>>;

    fn destroy_plugin(&self, plugin: &Arc<dyn Plugin>);

    /// Persisted configuration for `config_path` (empty if none)
    fn load_configuration(&self, config_path: &str) -> Config;

    fn save_configuration(&self, config_path: &str, config: &Config);

    /// Descriptor assembled from the parameter schema
    fn descriptor(&self, path: &str) -> Option<DriverDescriptor> {
        self.parameters_description(path)
            .map(|parameters| DriverDescriptor::new(path, parameters))
    }
}
