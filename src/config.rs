//! Configuration, loadable from YAML.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```yaml
//! storage:
//!   backend: disk
//!   path: /var/lib/hustle/queue.redb
//! poll_interval_ms: 50
//! default_priority: 1024
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::job::DEFAULT_PRIORITY;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct HustleConfig {
    pub storage: StorageConfig,
    /// How long consumers and subscribers wait between polls when idle.
    pub poll_interval_ms: u64,
    /// Priority of jobs put without one.
    pub default_priority: u32,
}

impl Default for HustleConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::Memory,
            poll_interval_ms: 50,
            default_priority: DEFAULT_PRIORITY,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Lost when the store is closed.
    #[default]
    Memory,
    /// A redb database file.
    Disk { path: PathBuf },
}

impl HustleConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|error| Error::config("parsing YAML", error))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|error| {
            Error::config(format!("reading {}", path.display()), error)
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
