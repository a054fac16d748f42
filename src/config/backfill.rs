use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackfillConfig {
    /// Replay missing revisions from the remote store. When disabled, gaps
    /// are still detected and reported.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// A replay stream quiet for this long has caught up (milliseconds)
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl BackfillConfig {
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.idle_timeout_ms == 0 {
            return Err(Error::InvalidConfig("backfill idle_timeout_ms cannot be 0".into()));
        }
        Ok(())
    }
}

fn default_enabled() -> bool {
    true
}
fn default_idle_timeout_ms() -> u64 {
    5_000
}
