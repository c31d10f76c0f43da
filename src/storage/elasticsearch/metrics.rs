//! Prometheus metrics for the Elasticsearch client

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Gauge, HistogramVec,
};

/// Elasticsearch client metrics
pub struct StorageMetrics {
    /// Requests sent to the engine
    pub requests: CounterVec,

    /// Request latency
    pub request_latency: HistogramVec,

    /// Startup attempts, by outcome
    pub startup_attempts: CounterVec,

    /// 1 once the client is ready, 0 otherwise
    pub ready: Gauge,

    /// Bulk documents by outcome, including the ones a full queue rejected
    pub bulk_documents: CounterVec,
}

lazy_static! {
    pub static ref STORAGE_METRICS: StorageMetrics = StorageMetrics {
        requests: register_counter_vec!(
            "topology_store_es_requests_total",
            "Total number of requests sent to Elasticsearch",
            &["method", "status"]
        )
        .unwrap(),

        request_latency: register_histogram_vec!(
            "topology_store_es_request_latency_seconds",
            "Elasticsearch request latency in seconds",
            &["method"]
        )
        .unwrap(),

        startup_attempts: register_counter_vec!(
            "topology_store_es_startup_attempts_total",
            "Total number of index provisioning attempts",
            &["outcome"]
        )
        .unwrap(),

        ready: register_gauge!(
            "topology_store_es_ready",
            "Whether the Elasticsearch client finished provisioning"
        )
        .unwrap(),

        bulk_documents: register_counter_vec!(
            "topology_store_es_bulk_documents_total",
            "Total number of documents sent through bulk requests",
            &["outcome"]
        )
        .unwrap(),
    };
}

pub(crate) fn record_request(method: &str, status: &str, seconds: f64) {
    STORAGE_METRICS
        .requests
        .with_label_values(&[method, status])
        .inc();
    STORAGE_METRICS
        .request_latency
        .with_label_values(&[method])
        .observe(seconds);
}
