//! Common test utilities for the Elasticsearch client
//!
//! [`FakeEngine`] is an in-memory [`Connection`] that records every request
//! and answers through a scripted responder.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use topology_store::storage::elasticsearch::{
    Connection, Method, RawResponse, Sleeper, StorageError, StorageResult,
};

/// A request seen by the fake engine
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
}

impl Recorded {
    pub fn is(&self, method: Method, path: &str) -> bool {
        self.method == method && self.path == path
    }

    pub fn json_body(&self) -> serde_json::Value {
        serde_json::from_str(self.body.as_deref().unwrap_or("null")).unwrap()
    }
}

type Responder = Box<dyn Fn(&Recorded) -> StorageResult<RawResponse> + Send + Sync>;

pub struct FakeEngine {
    requests: Mutex<Vec<Recorded>>,
    responder: Responder,
    closed: AtomicBool,
}

impl FakeEngine {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&Recorded) -> StorageResult<RawResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            responder: Box::new(responder),
            closed: AtomicBool::new(false),
        })
    }

    /// An engine accepting everything, with an empty alias table
    pub fn healthy() -> Arc<Self> {
        Self::new(healthy_response)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, method: Method, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|request| request.is(method.clone(), path))
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for FakeEngine {
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<String>,
    ) -> StorageResult<RawResponse> {
        if self.is_closed() {
            return Err(StorageError::ConnectionClosed);
        }

        let request = Recorded {
            method,
            path: path.to_string(),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body,
        };
        self.requests.lock().push(request.clone());
        (self.responder)(&request)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Default answers of a reachable, empty engine
pub fn healthy_response(request: &Recorded) -> StorageResult<RawResponse> {
    let body = match request.path.as_str() {
        "/_aliases" if request.method == Method::GET => "{}",
        "/_bulk" => r#"{"took": 1, "errors": false, "items": []}"#,
        _ => r#"{"acknowledged": true}"#,
    };
    Ok(RawResponse::new(200, body))
}

pub fn refused() -> StorageResult<RawResponse> {
    Err(StorageError::ConnectionFailed(
        "connection refused".to_string(),
    ))
}

/// Sleeper recording the requested delays without waiting
#[derive(Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().push(duration);
        tokio::task::yield_now().await;
    }
}
