//! Configuration management for Ratekeeper.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{RatekeeperError, Result};
use crate::policy::PolicyRuleSpec;
use crate::ratelimit::LimiterSpec;
use crate::storage::StoreConfig;

/// Prefix for environment variable overrides, e.g. `RATEKEEPER__SERVER__LISTEN_ADDR`.
const ENV_PREFIX: &str = "RATEKEEPER";

/// Main configuration for the Ratekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// State storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Limiters created at startup
    #[serde(default)]
    pub limiters: Vec<LimiterSpec>,

    /// Policy rules installed at startup
    #[serde(default)]
    pub policies: Vec<PolicyRuleSpec>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// State storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Number of lock shards
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,

    /// TTL in seconds for state written without an explicit TTL; 0 never expires
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Interval in seconds between sweeps of expired state
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
            default_ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_shard_count() -> usize {
    16
}

fn default_ttl_secs() -> u64 {
    10
}

fn default_sweep_interval() -> u64 {
    5
}

impl StorageConfig {
    /// Convert into the store's construction parameters.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            shard_count: self.shard_count,
            default_ttl: match self.default_ttl_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}

impl ServiceConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RatekeeperError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from an optional YAML file layered with
    /// `RATEKEEPER__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}
