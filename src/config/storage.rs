use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::utils::paths::default_db_path;
use crate::Error;
use crate::Result;

/// Which adaptor backs the revision store
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageEngine {
    /// Single SQLite file; readers in other processes are safe
    #[default]
    Sqlite,
    /// Embedded sled database; single process only
    Sled,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub engine: StorageEngine,

    /// Database file (sqlite) or directory (sled)
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// How long a SQLite writer waits on a locked database (milliseconds)
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Page cache of the sled engine (bytes)
    #[serde(default = "default_sled_cache_capacity")]
    pub sled_cache_capacity: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            engine: StorageEngine::default(),
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            sled_cache_capacity: default_sled_cache_capacity(),
        }
    }
}

impl StorageConfig {
    /// Validates storage configuration
    /// # Errors
    /// Returns `Error::InvalidConfig` when the database path is empty
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("file not defined".into()));
        }
        if self.engine == StorageEngine::Sled && self.sled_cache_capacity == 0 {
            return Err(Error::InvalidConfig("sled_cache_capacity must be greater than 0".into()));
        }
        Ok(())
    }
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}
fn default_sled_cache_capacity() -> u64 {
    64 * 1024 * 1024 //64MB
}
