//! Elasticsearch backend for topology documents
//!
//! The backend is split along the life of a document:
//!
//! - **Filter compilation**: [`compile_filter`] turns an abstract
//!   [`Filter`](crate::filters::Filter) tree into a query fragment
//! - **Index lifecycle**: [`IndexManager`] opens or creates the versioned
//!   index, pushes the object mappings and moves the store alias onto it
//! - **Store facade**: [`ElasticSearchClient`] exposes index/get/update/
//!   delete/search against the alias and provisions the index on `start`
//! - **Bulk writes**: [`BulkIndexer`] batches documents into `_bulk` requests
//!
//! ```text
//!   ElasticSearchClient ──► IndexManager ──┐
//!          │                                ├──► Connection (reqwest)
//!          └──────────► BulkIndexer ───────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use topology_store::storage::elasticsearch::{ElasticSearchClient, ElasticsearchConfig, ObjectMapping};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ElasticsearchConfig::builder().host("127.0.0.1:9200").build();
//!     let client = ElasticSearchClient::new(config)?;
//!
//!     client
//!         .start(&[ObjectMapping::new("node", r#"{"dynamic_templates": []}"#)])
//!         .await?;
//!
//!     client.index("node", "n1", &serde_json::json!({"Name": "eth0"})).await?;
//!     client.stop().await;
//!     Ok(())
//! }
//! ```

mod bulk;
mod client;
mod config;
mod connection;
mod error;
mod index;
mod metrics;
mod query;
mod response;
mod retry;

pub use bulk::{
    encode_batch, BulkAction, BulkIndexer, BulkOperation, BulkSettings, BulkStats,
    DEFAULT_FLUSH_INTERVAL,
};
pub use client::ElasticSearchClient;
pub use config::{ElasticsearchConfig, ElasticsearchConfigBuilder, DEFAULT_BULK_MAX_DOCS};
pub use connection::{Connection, HttpConnection, RawResponse};
pub use error::{StorageError, StorageResult};
pub use index::{
    plan_alias_actions, AliasAction, AliasTarget, IndexDescriptor, IndexManager, ObjectMapping,
    INDEX_VERSION, STORE_NAME,
};
pub use metrics::{StorageMetrics, STORAGE_METRICS};
pub use query::{compile_filter, search_body, SortOrder};
pub use response::{BaseResponse, Hit, Hits, SearchResult};
pub use retry::{retry_with_policy, RetryPolicy, Sleeper, TokioSleeper, DEFAULT_RETRY_INTERVAL};

pub use reqwest::Method;
