//! Configuration management for the historian.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Command line overrides applied by the binary
//! - Component-wise validation
mod backfill;
mod remote;
mod storage;
pub use backfill::*;
pub use remote::*;
pub use storage::*;

use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Environment variable naming an extra TOML configuration file
pub const CONFIG_PATH_ENV: &str = "ETX_CONFIG";

/// Prefix of environment overrides, e.g. `ETX__REMOTE__ADDR`
const ENV_PREFIX: &str = "ETX";

/// Main configuration container for the historian
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `ETX_CONFIG`
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct HistorianConfig {
    /// Local history store location and engine
    #[serde(default)]
    pub storage: StorageConfig,
    /// Remote etcd endpoint and watched key range
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Gap repair behaviour
    #[serde(default)]
    pub backfill: BackfillConfig,
}

impl Debug for HistorianConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("HistorianConfig")
            .field("storage", &self.storage)
            .field("remote", &self.remote)
            .field("backfill", &self.backfill)
            .finish()
    }
}

impl HistorianConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `ETX_CONFIG` environment variable (if set)
    /// 3. Environment variables with `ETX__` prefix (highest priority)
    ///
    /// # Note
    /// This method does NOT validate the configuration. Validation is deferred to allow
    /// further overrides via `with_override_config()`. Callers MUST call `validate()`
    /// before using the configuration.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates configuration and returns validated instance.
    ///
    /// Must be called after all overrides, including command line flags.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` from any subsystem.
    pub fn validate(self) -> Result<Self> {
        self.storage.validate()?;
        self.remote.validate()?;
        self.backfill.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
