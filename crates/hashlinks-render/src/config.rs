use std::path::Path;

use serde::{Deserialize, Serialize};

use hashlinks_cache::ResourceCacheConfig;
use hashlinks_resolver::ResolverConfig;
use hashlinks_sandbox::{ExecutorConfig, SandboxLimits};
use hashlinks_state::StateStoreConfig;
use hashlinks_types::Network;

use crate::error::{RenderError, RenderResult};

/// Top-level engine configuration, loadable from TOML.
///
/// ```toml
/// max_depth = 6
/// network = "mainnet"
///
/// [cache]
/// ttl_secs = 600
///
/// [sandbox]
/// fuel = 5000000
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Nesting limit for embedded blocks.
    pub max_depth: usize,
    /// Embedded blocks rendered per top-level render, across all levels.
    pub max_nodes: usize,
    pub network: Network,
    pub resolution_timeout_ms: u64,
    pub action_timeout_ms: u64,
    pub max_block_states: usize,
    pub max_message_hops: usize,
    pub cache: ResourceCacheConfig,
    pub sandbox: SandboxLimits,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_nodes: 500,
            network: Network::default(),
            resolution_timeout_ms: 30_000,
            action_timeout_ms: 30_000,
            max_block_states: 1000,
            max_message_hops: 16,
            cache: ResourceCacheConfig::default(),
            sandbox: SandboxLimits::default(),
        }
    }
}

impl RenderConfig {
    pub fn from_toml_str(s: &str) -> RenderResult<Self> {
        toml::from_str(s).map_err(|e| RenderError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> RenderResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RenderError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn resolver(&self) -> ResolverConfig {
        ResolverConfig {
            network: self.network,
            timeout_ms: self.resolution_timeout_ms,
        }
    }

    pub fn executor(&self) -> ExecutorConfig {
        ExecutorConfig {
            network: self.network,
            timeout_ms: self.action_timeout_ms,
        }
    }

    pub fn state(&self) -> StateStoreConfig {
        StateStoreConfig {
            max_block_states: self.max_block_states,
            max_message_hops: self.max_message_hops,
        }
    }

    /// Cache settings, on the engine's network.
    pub fn resource_cache(&self) -> ResourceCacheConfig {
        ResourceCacheConfig {
            network: self.network,
            ..self.cache.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RenderConfig::from_toml_str(
            r#"
            max_depth = 4
            network = "mainnet"

            [cache]
            ttl_secs = 60

            [sandbox]
            fuel = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.max_depth, 4);
        assert_eq!(config.max_nodes, 500);
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.max_bytes, 50 * 1024 * 1024);
        assert_eq!(config.sandbox.fuel, 1000);
        assert_eq!(config.resource_cache().network, Network::Mainnet);
        assert_eq!(config.executor().network, Network::Mainnet);
    }

    #[test]
    fn unknown_network_is_a_config_error() {
        let err = RenderConfig::from_toml_str(r#"network = "devnet""#).unwrap_err();
        assert!(matches!(err, RenderError::Config(_)));
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_nodes = 12").unwrap();
        let config = RenderConfig::load(file.path()).unwrap();
        assert_eq!(config.max_nodes, 12);

        assert!(RenderConfig::load("/nonexistent/hashlinks.toml").is_err());
    }
}
