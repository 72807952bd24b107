//! Device manager configuration

use serde::{Deserialize, Serialize};

/// Device manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceManagerConfig {
    /// Upper bound of concurrent per-resource detection workers
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    32
}

impl Default for DeviceManagerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
        }
    }
}
