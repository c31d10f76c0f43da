//! Process-wide readiness gauge
//!
//! Kept in its own test binary: the gauge is shared by every client in the process.

mod common;

use common::FakeEngine;
use tokio_test::assert_ok;
use topology_store::storage::elasticsearch::*;

#[tokio::test]
async fn test_ready_gauge_follows_start_and_stop() {
    let first = ElasticSearchClient::with_connection(
        ElasticsearchConfig::default(),
        FakeEngine::healthy(),
    )
    .unwrap();
    assert_ok!(first.start(&[]).await);
    assert_eq!(STORAGE_METRICS.ready.get(), 1.0);

    // building another client does not touch a running one's readiness
    let second = ElasticSearchClient::with_connection(
        ElasticsearchConfig::default(),
        FakeEngine::healthy(),
    )
    .unwrap();
    assert!(!second.started());
    assert_eq!(STORAGE_METRICS.ready.get(), 1.0);

    // nor does stopping a client that never started
    second.stop().await;
    assert_eq!(STORAGE_METRICS.ready.get(), 1.0);

    first.stop().await;
    assert_eq!(STORAGE_METRICS.ready.get(), 0.0);
}
