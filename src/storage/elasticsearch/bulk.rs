//! Batched document writes through the `_bulk` endpoint
//!
//! Operations are queued on a bounded channel and drained by a single
//! worker task. Queueing never waits: a full queue rejects the operation. The worker sends a batch as soon as it holds `max_docs`
//! operations, or every `flush_interval` otherwise, with at most `max_conns`
//! bulk requests in flight. A failed request is retried once after
//! `retry_interval` (a zero interval disables the retry).

use crate::storage::elasticsearch::config::ElasticsearchConfig;
use crate::storage::elasticsearch::connection::Connection;
use crate::storage::elasticsearch::error::{StorageError, StorageResult};
use crate::storage::elasticsearch::metrics::STORAGE_METRICS;
use parking_lot::Mutex;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Longest time a queued operation waits before being sent
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    Index,
    Update,
    Delete,
}

impl BulkAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkAction::Index => "index",
            BulkAction::Update => "update",
            BulkAction::Delete => "delete",
        }
    }
}

/// One queued write
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOperation {
    pub action: BulkAction,
    pub index: String,
    pub doc_type: String,
    pub id: String,
    pub parent: Option<String>,
    pub document: Option<Value>,
}

impl BulkOperation {
    pub fn index(
        index: impl Into<String>,
        doc_type: impl Into<String>,
        id: impl Into<String>,
        document: Value,
    ) -> Self {
        Self {
            action: BulkAction::Index,
            index: index.into(),
            doc_type: doc_type.into(),
            id: id.into(),
            parent: None,
            document: Some(document),
        }
    }

    /// Partial update; `document` is merged into the stored one
    pub fn update(
        index: impl Into<String>,
        doc_type: impl Into<String>,
        id: impl Into<String>,
        document: Value,
    ) -> Self {
        Self {
            action: BulkAction::Update,
            document: Some(document),
            ..Self::index(index, doc_type, id, Value::Null)
        }
    }

    pub fn delete(index: impl Into<String>, doc_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            action: BulkAction::Delete,
            document: None,
            ..Self::index(index, doc_type, id, Value::Null)
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Append the NDJSON lines of this operation to `out`
    fn encode_into(&self, out: &mut String) -> StorageResult<()> {
        let header = BulkHeader {
            index: &self.index,
            doc_type: &self.doc_type,
            id: &self.id,
            parent: self.parent.as_deref(),
        };
        out.push_str(&serde_json::to_string(&json!({ self.action.as_str(): header }))?);
        out.push('\n');

        match (self.action, &self.document) {
            (BulkAction::Delete, _) => {}
            (BulkAction::Update, Some(document)) => {
                out.push_str(&serde_json::to_string(&json!({ "doc": document }))?);
                out.push('\n');
            }
            (_, document) => {
                out.push_str(&serde_json::to_string(document.as_ref().unwrap_or(&Value::Null))?);
                out.push('\n');
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct BulkHeader<'a> {
    #[serde(rename = "_index")]
    index: &'a str,

    #[serde(rename = "_type")]
    doc_type: &'a str,

    #[serde(rename = "_id")]
    id: &'a str,

    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<&'a str>,
}

#[derive(Deserialize)]
struct BulkSummary {
    #[serde(default)]
    errors: bool,

    #[serde(default)]
    items: Vec<Value>,
}

impl BulkSummary {
    fn failed_items(&self) -> usize {
        if !self.errors {
            return 0;
        }
        self.items
            .iter()
            .filter(|item| {
                item.as_object()
                    .and_then(|item| item.values().next())
                    .map_or(false, |result| result.get("error").is_some())
            })
            .count()
    }
}

/// Encode a batch as an NDJSON `_bulk` body
pub fn encode_batch(operations: &[BulkOperation]) -> StorageResult<String> {
    let mut body = String::new();
    for operation in operations {
        operation.encode_into(&mut body)?;
    }
    Ok(body)
}

/// Tuning of the bulk worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkSettings {
    pub max_docs: usize,
    pub max_conns: usize,
    pub retry_interval: Duration,
    pub flush_interval: Duration,

    /// Operations held for the worker before `queue` starts rejecting
    pub queue_capacity: usize,
}

impl BulkSettings {
    pub fn from_config(config: &ElasticsearchConfig) -> Self {
        let max_docs = config.effective_bulk_max_docs();
        let max_conns = config.max_conns.max(1);
        Self {
            max_docs,
            max_conns,
            retry_interval: config.retry_interval(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            queue_capacity: max_docs.saturating_mul(max_conns),
        }
    }
}

/// Documents the worker handed over so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkStats {
    pub indexed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    indexed: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn record(&self, indexed: usize, failed: usize) {
        self.indexed.fetch_add(indexed as u64, Ordering::Relaxed);
        self.failed.fetch_add(failed as u64, Ordering::Relaxed);
        STORAGE_METRICS
            .bulk_documents
            .with_label_values(&["indexed"])
            .inc_by(indexed as f64);
        STORAGE_METRICS
            .bulk_documents
            .with_label_values(&["failed"])
            .inc_by(failed as f64);
    }
}

/// Queue of documents persisted asynchronously in batches
pub struct BulkIndexer {
    connection: Arc<dyn Connection>,
    settings: BulkSettings,
    sender: mpsc::Sender<BulkOperation>,
    receiver: Mutex<Option<mpsc::Receiver<BulkOperation>>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl BulkIndexer {
    pub fn new(connection: Arc<dyn Connection>, settings: BulkSettings) -> Self {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));

        Self {
            connection,
            settings,
            sender,
            receiver: Mutex::new(Some(receiver)),
            shutdown: Mutex::new(None),
            worker: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn settings(&self) -> &BulkSettings {
        &self.settings
    }

    /// Queue an operation. Operations queued before `start` wait for the worker.
    ///
    /// Fails with `StorageError::BulkQueueFull` once `queue_capacity`
    /// operations are pending.
    pub fn queue(&self, operation: BulkOperation) -> StorageResult<()> {
        match self.sender.try_send(operation) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let capacity = self.sender.max_capacity();
                warn!(capacity, "Bulk queue full, rejecting operation");
                STORAGE_METRICS
                    .bulk_documents
                    .with_label_values(&["rejected"])
                    .inc();
                Err(StorageError::BulkQueueFull { capacity })
            }
            Err(TrySendError::Closed(_)) => Err(StorageError::BulkUnavailable(
                "bulk indexer stopped".to_string(),
            )),
        }
    }

    /// Queue a document for indexing
    pub fn index(&self, index: &str, doc_type: &str, id: &str, document: Value) -> StorageResult<()> {
        self.queue(BulkOperation::index(index, doc_type, id, document))
    }

    /// Spawn the worker. Starting twice is a no-op.
    pub fn start(&self) {
        let receiver = match self.receiver.lock().take() {
            Some(receiver) => receiver,
            None => {
                warn!("Bulk indexer already started");
                return;
            }
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.shutdown.lock() = Some(shutdown_tx);

        let worker = BulkWorker {
            connection: self.connection.clone(),
            settings: self.settings,
            counters: self.counters.clone(),
        };
        *self.worker.lock() = Some(tokio::spawn(worker.run(receiver, shutdown_rx)));

        info!(
            max_docs = self.settings.max_docs,
            max_conns = self.settings.max_conns,
            queue_capacity = self.sender.max_capacity(),
            "Bulk indexer started"
        );
    }

    /// Flush everything queued so far and stop the worker
    pub async fn stop(&self) {
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(());
        }

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "Bulk indexer worker panicked");
            }
            info!("Bulk indexer stopped");
        }
    }

    pub fn stats(&self) -> BulkStats {
        BulkStats {
            indexed: self.counters.indexed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

struct BulkWorker {
    connection: Arc<dyn Connection>,
    settings: BulkSettings,
    counters: Arc<Counters>,
}

impl BulkWorker {
    async fn run(
        self,
        mut receiver: mpsc::Receiver<BulkOperation>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let permits = Arc::new(Semaphore::new(self.settings.max_conns));
        let mut in_flight = JoinSet::new();
        let mut batch = Vec::with_capacity(self.settings.max_docs);

        let period = self.settings.flush_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                operation = receiver.recv() => match operation {
                    Some(operation) => {
                        batch.push(operation);
                        if batch.len() >= self.settings.max_docs {
                            self.dispatch(&mut batch, &permits, &mut in_flight).await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.dispatch(&mut batch, &permits, &mut in_flight).await;
                    }
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                _ = &mut shutdown => break,
            }
        }

        receiver.close();
        while let Ok(operation) = receiver.try_recv() {
            batch.push(operation);
            if batch.len() >= self.settings.max_docs {
                self.dispatch(&mut batch, &permits, &mut in_flight).await;
            }
        }
        if !batch.is_empty() {
            self.dispatch(&mut batch, &permits, &mut in_flight).await;
        }
        while in_flight.join_next().await.is_some() {}
    }

    async fn dispatch(
        &self,
        batch: &mut Vec<BulkOperation>,
        permits: &Arc<Semaphore>,
        in_flight: &mut JoinSet<()>,
    ) {
        let operations = std::mem::replace(batch, Vec::with_capacity(self.settings.max_docs));
        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let connection = self.connection.clone();
        let counters = self.counters.clone();
        let retry_interval = self.settings.retry_interval;

        in_flight.spawn(async move {
            flush(connection.as_ref(), &operations, retry_interval, &counters).await;
            drop(permit);
        });
    }
}

async fn flush(
    connection: &dyn Connection,
    operations: &[BulkOperation],
    retry_interval: Duration,
    counters: &Counters,
) {
    let count = operations.len();
    let body = match encode_batch(operations) {
        Ok(body) => body,
        Err(e) => {
            error!(documents = count, error = %e, "Unable to encode bulk request");
            counters.record(0, count);
            return;
        }
    };

    let mut result = send_bulk(connection, body.clone()).await;
    if let Err(e) = &result {
        if !retry_interval.is_zero() {
            warn!(
                documents = count,
                error = %e,
                retry_secs = retry_interval.as_secs(),
                "Bulk request failed, retrying"
            );
            tokio::time::sleep(retry_interval).await;
            result = send_bulk(connection, body).await;
        }
    }

    match result {
        Ok(failed) => {
            if failed > 0 {
                warn!(documents = count, failed, "Bulk request partially failed");
            }
            counters.record(count.saturating_sub(failed), failed);
        }
        Err(e) => {
            error!(documents = count, error = %e, "Bulk request failed");
            counters.record(0, count);
        }
    }
}

/// Send one bulk body, returning the number of rejected items
async fn send_bulk(connection: &dyn Connection, body: String) -> StorageResult<usize> {
    let response = connection
        .request(Method::POST, "/_bulk", &[], Some(body))
        .await?
        .error_for_status()?;

    let summary: BulkSummary = response.json()?;
    Ok(summary.failed_items())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_index_with_parent() {
        let operation = BulkOperation::index("skydive", "edge", "e1", json!({"Parent": "n1"}))
            .with_parent("n1");
        let body = encode_batch(&[operation]).unwrap();

        let lines: Vec<Value> = body
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(
            lines,
            vec![
                json!({"index": {"_index": "skydive", "_type": "edge", "_id": "e1", "parent": "n1"}}),
                json!({"Parent": "n1"}),
            ]
        );
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_encode_update_and_delete() {
        let body = encode_batch(&[
            BulkOperation::update("skydive", "node", "n1", json!({"Name": "eth1"})),
            BulkOperation::delete("skydive", "node", "n2"),
        ])
        .unwrap();

        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            serde_json::from_str::<Value>(lines[1]).unwrap(),
            json!({"doc": {"Name": "eth1"}})
        );
        assert_eq!(
            serde_json::from_str::<Value>(lines[2]).unwrap(),
            json!({"delete": {"_index": "skydive", "_type": "node", "_id": "n2"}})
        );
    }

    #[test]
    fn test_failed_items() {
        let summary: BulkSummary = serde_json::from_value(json!({
            "errors": true,
            "items": [
                {"index": {"_id": "a", "status": 201}},
                {"index": {"_id": "b", "status": 400, "error": {"type": "mapper_parsing_exception"}}}
            ]
        }))
        .unwrap();
        assert_eq!(summary.failed_items(), 1);
    }

    #[test]
    fn test_settings_from_config() {
        let config = ElasticsearchConfig::builder()
            .max_conns(4)
            .retry_secs(0)
            .bulk_max_docs(0)
            .build();
        let settings = BulkSettings::from_config(&config);
        assert_eq!(settings.max_conns, 4);
        assert_eq!(settings.max_docs, 100);
        assert_eq!(settings.queue_capacity, 400);
        assert!(settings.retry_interval.is_zero());
    }
}
