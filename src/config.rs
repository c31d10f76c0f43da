use crate::storage::elasticsearch::ElasticsearchConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable naming an optional override file
pub const CONFIG_PATH_ENV: &str = "TOPOLOGY_STORE_CONFIG";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage backends
    #[serde(default)]
    pub storage: StorageConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the embedded defaults, the file named by
    /// `TOPOLOGY_STORE_CONFIG` and the environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config/topology-store.toml".to_string());

        Self::builder()
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()
    }

    /// Load configuration from the embedded defaults overridden by an explicit file
    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        Self::builder()
            .add_source(config::File::from(path).required(true))
            .build()?
            .try_deserialize()
    }

    fn builder() -> config::ConfigBuilder<config::builder::DefaultState> {
        config::Config::builder().add_source(config::File::from_str(
            include_str!("../config/default.toml"),
            config::FileFormat::Toml,
        ))
    }

    // TOPOLOGY_STORE__STORAGE__ELASTICSEARCH__HOST=es:9200
    fn environment() -> config::Environment {
        config::Environment::with_prefix("TOPOLOGY_STORE")
            .separator("__")
            .try_parsing(true)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Elasticsearch backend
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
