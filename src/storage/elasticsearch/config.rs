//! Elasticsearch client configuration

use crate::storage::elasticsearch::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Documents per bulk request when `bulk_maxdocs` is not set
pub const DEFAULT_BULK_MAX_DOCS: usize = 100;

/// Elasticsearch client configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ElasticsearchConfig {
    /// Engine address as `host:port`
    #[serde(default = "default_host")]
    pub host: String,

    /// Maximum number of concurrent connections / bulk flushes
    #[serde(rename = "maxconns", default = "default_max_conns")]
    #[validate(range(min = 1))]
    pub max_conns: usize,

    /// Seconds to wait before retrying a failed bulk request (0 disables the retry)
    #[serde(rename = "retry", default = "default_retry_secs")]
    pub retry_secs: u64,

    /// Documents per bulk request (0 keeps the default)
    #[serde(rename = "bulk_maxdocs", default = "default_bulk_max_docs")]
    pub bulk_max_docs: usize,
}

impl ElasticsearchConfig {
    /// Create a new builder
    pub fn builder() -> ElasticsearchConfigBuilder {
        ElasticsearchConfigBuilder::default()
    }

    /// Split `host` into its address and port parts
    pub fn parse_host(&self) -> StorageResult<(String, String)> {
        let parts: Vec<&str> = self.host.split(':').collect();
        if parts.len() != 2 {
            return Err(StorageError::BadConfig);
        }
        Ok((parts[0].to_string(), parts[1].to_string()))
    }

    /// Check every field. Performs no network activity.
    pub fn check(&self) -> StorageResult<()> {
        self.parse_host()?;
        self.validate()?;
        Ok(())
    }

    /// Effective number of documents per bulk request
    pub fn effective_bulk_max_docs(&self) -> usize {
        if self.bulk_max_docs > 0 {
            self.bulk_max_docs
        } else {
            DEFAULT_BULK_MAX_DOCS
        }
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            max_conns: default_max_conns(),
            retry_secs: default_retry_secs(),
            bulk_max_docs: default_bulk_max_docs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1:9200".to_string()
}

fn default_max_conns() -> usize {
    10
}

fn default_retry_secs() -> u64 {
    60
}

fn default_bulk_max_docs() -> usize {
    DEFAULT_BULK_MAX_DOCS
}

/// Builder for ElasticsearchConfig
#[derive(Debug, Clone, Default)]
pub struct ElasticsearchConfigBuilder {
    config: ElasticsearchConfig,
}

impl ElasticsearchConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn max_conns(mut self, max_conns: usize) -> Self {
        self.config.max_conns = max_conns;
        self
    }

    pub fn retry_secs(mut self, secs: u64) -> Self {
        self.config.retry_secs = secs;
        self
    }

    pub fn bulk_max_docs(mut self, docs: usize) -> Self {
        self.config.bulk_max_docs = docs;
        self
    }

    pub fn build(self) -> ElasticsearchConfig {
        self.config
    }
}
