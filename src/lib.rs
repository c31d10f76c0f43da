//! Topology Store
//!
//! Elasticsearch storage adapter for graph topology records (nodes, edges and
//! their history). It compiles abstract filter trees into engine queries,
//! provisions a versioned index behind a stable alias, and exposes a small
//! document store with batched writes.

pub mod config;
pub mod error;
pub mod filters;
pub mod storage;

pub use config::Config;
pub use error::{AppError, Result};
pub use filters::{BoolFilterOp, Filter, RangeBound};
pub use storage::elasticsearch::{
    compile_filter, ElasticSearchClient, ElasticsearchConfig, ObjectMapping, StorageError,
    StorageResult,
};
