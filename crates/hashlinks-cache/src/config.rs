use serde::{Deserialize, Serialize};

use hashlinks_types::Network;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceCacheConfig {
    /// Ceiling on the total size of cached content.
    pub max_bytes: usize,
    /// Entries older than this are fetched again.
    pub ttl_secs: u64,
    /// Scripts above this size are rejected.
    pub max_script_bytes: usize,
    /// Network passed to the content resolver.
    pub network: Network,
}

impl Default for ResourceCacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 50 * 1024 * 1024,
            ttl_secs: 3600,
            max_script_bytes: 1024 * 1024,
            network: Network::default(),
        }
    }
}
