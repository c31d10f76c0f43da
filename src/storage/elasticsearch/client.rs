//! Elasticsearch store facade

use crate::filters::Filter;
use crate::storage::elasticsearch::bulk::{BulkIndexer, BulkOperation, BulkSettings, BulkStats};
use crate::storage::elasticsearch::config::ElasticsearchConfig;
use crate::storage::elasticsearch::connection::{Connection, HttpConnection, RawResponse};
use crate::storage::elasticsearch::error::{StorageError, StorageResult};
use crate::storage::elasticsearch::index::{IndexDescriptor, IndexManager, ObjectMapping};
use crate::storage::elasticsearch::metrics::STORAGE_METRICS;
use crate::storage::elasticsearch::query::compile_filter;
use crate::storage::elasticsearch::response::{BaseResponse, SearchResult};
use crate::storage::elasticsearch::retry::{retry_with_policy, RetryPolicy, Sleeper, TokioSleeper};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Serialize)]
struct PartialDocument<'a, T: ?Sized> {
    doc: &'a T,
}

/// Client storing topology documents in Elasticsearch
///
/// Construction performs no I/O. [`ElasticSearchClient::start`] provisions the
/// index and flips the client to ready; document operations go through the
/// store alias and surface engine failures as errors without retrying.
/// Once [`ElasticSearchClient::stop`] was called the client cannot be started again.
pub struct ElasticSearchClient {
    connection: Arc<dyn Connection>,
    indexer: BulkIndexer,
    index_manager: IndexManager,
    retry_policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    started: AtomicBool,
    stopping: AtomicBool,
}

impl ElasticSearchClient {
    /// Create a client talking HTTP to `config.host`
    ///
    /// Fails with `StorageError::BadConfig` when the host is not a single
    /// `host:port` pair.
    pub fn new(config: ElasticsearchConfig) -> StorageResult<Self> {
        config.check()?;
        let connection = HttpConnection::from_config(&config)?;
        Self::with_connection(config, Arc::new(connection))
    }

    /// Create a client on top of an existing connection
    pub fn with_connection(
        config: ElasticsearchConfig,
        connection: Arc<dyn Connection>,
    ) -> StorageResult<Self> {
        config.check()?;

        let indexer = BulkIndexer::new(connection.clone(), BulkSettings::from_config(&config));
        let index_manager = IndexManager::new(connection.clone(), IndexDescriptor::current());

        Ok(Self {
            connection,
            indexer,
            index_manager,
            retry_policy: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        })
    }

    /// Replace the startup retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Replace the sleeper used between startup attempts
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Provision against another index generation
    pub fn with_index(mut self, descriptor: IndexDescriptor) -> Self {
        self.index_manager = IndexManager::new(self.connection.clone(), descriptor);
        self
    }

    pub fn index_descriptor(&self) -> &IndexDescriptor {
        self.index_manager.descriptor()
    }

    fn store(&self) -> &str {
        &self.index_manager.descriptor().alias
    }

    /// Provision the index, retrying until it succeeds or the retry policy gives up
    ///
    /// With the default policy this only returns once the engine is reachable
    /// and provisioned, or fails with `StorageError::Stopped` when
    /// [`ElasticSearchClient::stop`] is called meanwhile.
    pub async fn start(&self, mappings: &[ObjectMapping]) -> StorageResult<()> {
        let manager = &self.index_manager;
        let stopping = &self.stopping;
        let (_, attempts) = retry_with_policy(self.retry_policy, self.sleeper.as_ref(), |_| async move {
            if stopping.load(Ordering::SeqCst) {
                return Err(StorageError::Stopped);
            }
            let result = manager.ensure_index(mappings).await;
            let outcome = if result.is_ok() { "success" } else { "failure" };
            STORAGE_METRICS
                .startup_attempts
                .with_label_values(&[outcome])
                .inc();
            result
        })
        .await
        .map_err(|e| {
            if self.stopping.load(Ordering::SeqCst) {
                StorageError::Stopped
            } else {
                e
            }
        })?;

        self.indexer.start();
        self.started.store(true, Ordering::SeqCst);
        STORAGE_METRICS.ready.set(1.0);

        // stop() may have run while the index was being provisioned
        if self.stopping.load(Ordering::SeqCst) {
            self.teardown().await;
            STORAGE_METRICS.ready.set(0.0);
            return Err(StorageError::Stopped);
        }

        info!(
            index = %self.index_manager.descriptor().name,
            attempts,
            "ElasticSearchStorage started"
        );
        Ok(())
    }

    /// Run [`ElasticSearchClient::start`] on its own task
    pub fn spawn_start(self: &Arc<Self>, mappings: Vec<ObjectMapping>) -> JoinHandle<StorageResult<()>> {
        let client = self.clone();
        tokio::spawn(async move { client.start(&mappings).await })
    }

    /// Flush the bulk queue and close the connection, if the client was started
    ///
    /// A pending [`ElasticSearchClient::start`] gives up instead of marking the
    /// client ready, and tears down whatever it already brought up.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.teardown().await;
    }

    async fn teardown(&self) {
        if self.started.swap(false, Ordering::SeqCst) {
            self.indexer.stop().await;
            self.connection.close().await;
            STORAGE_METRICS.ready.set(0.0);
            info!("ElasticSearchStorage stopped");
        }
    }

    /// Whether provisioning completed
    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Compile a filter tree into a query fragment
    pub fn format_filter(&self, filter: Option<&Filter>, prefix: &str) -> Option<Value> {
        compile_filter(filter, prefix)
    }

    /// Index a document
    pub async fn index<T: Serialize + ?Sized>(
        &self,
        object_type: &str,
        id: &str,
        data: &T,
    ) -> StorageResult<BaseResponse> {
        let body = serde_json::to_string(data)?;
        let response = self
            .connection
            .request(Method::PUT, &self.document_path(object_type, id), &[], Some(body))
            .await?;
        response.error_for_status()?.json()
    }

    /// Index a document as the child of `parent`
    pub async fn index_child<T: Serialize + ?Sized>(
        &self,
        object_type: &str,
        parent: &str,
        id: &str,
        data: &T,
    ) -> StorageResult<BaseResponse> {
        let body = serde_json::to_string(data)?;
        let response = self
            .connection
            .request(
                Method::PUT,
                &self.document_path(object_type, id),
                &[("parent", parent)],
                Some(body),
            )
            .await?;
        response.error_for_status()?.json()
    }

    /// Replace a stored document
    pub async fn update<T: Serialize + ?Sized>(
        &self,
        object_type: &str,
        id: &str,
        data: &T,
    ) -> StorageResult<BaseResponse> {
        self.index(object_type, id, data).await
    }

    /// Merge `data` into a stored document
    pub async fn update_with_partial_doc<T: Serialize + ?Sized>(
        &self,
        object_type: &str,
        id: &str,
        data: &T,
    ) -> StorageResult<BaseResponse> {
        let body = serde_json::to_string(&PartialDocument { doc: data })?;
        let response = self
            .connection
            .request(
                Method::POST,
                &format!("{}/_update", self.document_path(object_type, id)),
                &[],
                Some(body),
            )
            .await?;
        response.error_for_status()?.json()
    }

    /// Fetch a document. A missing document is a response with `found == false`.
    pub async fn get(&self, object_type: &str, id: &str) -> StorageResult<BaseResponse> {
        let response = self
            .connection
            .request(Method::GET, &self.document_path(object_type, id), &[], None)
            .await?;
        Self::found_or_missing(response)
    }

    /// Delete a document. A missing document is a response with `found == false`.
    pub async fn delete(&self, object_type: &str, id: &str) -> StorageResult<BaseResponse> {
        let response = self
            .connection
            .request(Method::DELETE, &self.document_path(object_type, id), &[], None)
            .await?;
        Self::found_or_missing(response)
    }

    /// Run a raw query against the documents of one object type
    pub async fn search(&self, object_type: &str, query: &str) -> StorageResult<SearchResult> {
        let response = self
            .connection
            .request(
                Method::POST,
                &format!("/{}/{}/_search", self.store(), object_type),
                &[],
                Some(query.to_string()),
            )
            .await?;
        response.error_for_status()?.json()
    }

    /// Queue a document on the bulk indexer
    pub fn bulk_index(&self, object_type: &str, id: &str, data: Value) -> StorageResult<()> {
        self.indexer.index(self.store(), object_type, id, data)
    }

    /// Queue any bulk operation
    pub fn bulk_queue(&self, operation: BulkOperation) -> StorageResult<()> {
        self.indexer.queue(operation)
    }

    pub fn bulk_stats(&self) -> BulkStats {
        self.indexer.stats()
    }

    fn document_path(&self, object_type: &str, id: &str) -> String {
        format!("/{}/{}/{}", self.store(), object_type, id)
    }

    fn found_or_missing(response: RawResponse) -> StorageResult<BaseResponse> {
        if response.status == 404 {
            if let Ok(base) = response.json::<BaseResponse>() {
                return Ok(BaseResponse {
                    found: false,
                    ..base
                });
            }
        }
        response.error_for_status()?.json()
    }
}
