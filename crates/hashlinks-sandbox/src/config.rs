use std::time::Duration;

use serde::{Deserialize, Serialize};

use hashlinks_types::Network;

/// Per-instance resource ceilings for sandboxed modules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxLimits {
    /// Linear memory ceiling in bytes.
    pub memory_bytes: usize,
    /// Instruction budget for one instantiate-call-release cycle.
    pub fuel: u64,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 16 * 1024 * 1024,
            fuel: 10_000_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Network handed to every module call.
    pub network: Network,
    /// Upper bound on lookups, fetches, and the module call itself.
    pub timeout_ms: u64,
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            timeout_ms: 30_000,
        }
    }
}
