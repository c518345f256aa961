use std::time::Duration;

use serde::{Deserialize, Serialize};

use hashlinks_types::Network;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub network: Network,
    /// Upper bound on a single loader or content-resolver call.
    pub timeout_ms: u64,
}

impl ResolverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            timeout_ms: 30_000,
        }
    }
}
