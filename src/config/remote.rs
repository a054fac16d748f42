use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Serialize, Deserialize, Clone)]
pub struct RemoteConfig {
    /// etcd endpoint address, e.g. `http://127.0.0.1:2379`
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Value of the `Authorization` header, if any
    #[serde(default)]
    pub auth: Option<String>,

    /// Key prefix to watch
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Ask the server to attach the previous value of each key to events
    #[serde(default)]
    pub prev_kv: bool,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("addr", &self.addr)
            .field("auth", &self.auth.as_ref().map(|_| "<redacted>"))
            .field("prefix", &self.prefix)
            .field("prev_kv", &self.prev_kv)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            auth: None,
            prefix: default_prefix(),
            prev_kv: false,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl RemoteConfig {
    /// Validates remote endpoint configuration
    /// # Errors
    /// Returns `Error::InvalidConfig` when:
    /// - The address is empty or not an http(s) URL
    /// - The connect timeout is zero
    pub fn validate(&self) -> Result<()> {
        if self.addr.is_empty() {
            return Err(Error::InvalidConfig("addr not defined".into()));
        }
        if !(self.addr.starts_with("http://") || self.addr.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "addr {} must start with http:// or https://",
                self.addr
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(Error::InvalidConfig("connect_timeout_ms cannot be 0".into()));
        }
        Ok(())
    }

    /// Endpoint without a trailing slash, ready for path concatenation
    pub fn base_url(&self) -> &str {
        self.addr.trim_end_matches('/')
    }
}

fn default_addr() -> String {
    "http://127.0.0.1:2379".to_string()
}
fn default_prefix() -> String {
    "/".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
