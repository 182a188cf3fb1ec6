//! Built-in maintenance job configuration.

use serde::{Deserialize, Serialize};

/// Settings for the recurring job that purges old failures and expired leases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Whether the worker binary installs the maintenance job.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Failed jobs older than this many days are deleted.
    #[serde(default = "default_retention")]
    pub failed_retention_days: u32,
    /// Frequency expression for the maintenance job.
    #[serde(default = "default_frequency")]
    pub frequency: String,
    /// Queue the maintenance job runs on.
    #[serde(default = "default_queue")]
    pub queue: String,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            failed_retention_days: default_retention(),
            frequency: default_frequency(),
            queue: default_queue(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_retention() -> u32 {
    7
}

fn default_frequency() -> String {
    "daily at 03:00".to_string()
}

fn default_queue() -> String {
    "default".to_string()
}
