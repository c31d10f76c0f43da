//! Connection handle to the Elasticsearch REST API

use crate::storage::elasticsearch::config::ElasticsearchConfig;
use crate::storage::elasticsearch::error::{StorageError, StorageResult};
use crate::storage::elasticsearch::metrics::record_request;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use parking_lot::RwLock;
use std::time::Instant;
use tracing::debug;

/// Status code and raw body of an engine response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> StorageResult<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| StorageError::DeserializationError(e.to_string()))
    }

    /// Turn a non-2xx response into an error
    pub fn error_for_status(self) -> StorageResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(StorageError::UnexpectedStatus {
                status: self.status,
                body: self.text(),
            })
        }
    }
}

/// A single logical connection to the engine
///
/// Implementations only need [`Connection::request`] and [`Connection::close`];
/// the index, mapping and alias primitives are expressed on top of `request`.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Issue a request. Transport failures are errors, any HTTP status is a response.
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<String>,
    ) -> StorageResult<RawResponse>;

    /// Release the connection. Later requests fail with `ConnectionClosed`.
    async fn close(&self);

    /// Open an existing index
    async fn open_index(&self, index: &str) -> StorageResult<()> {
        self.request(Method::POST, &format!("/{}/_open", index), &[], None)
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Create an index with default settings
    async fn create_index(&self, index: &str) -> StorageResult<()> {
        self.request(Method::PUT, &format!("/{}", index), &[], None)
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Push the mapping of one object type
    async fn put_mapping(&self, index: &str, object_type: &str, mapping: &str) -> StorageResult<()> {
        self.request(
            Method::PUT,
            &format!("/{}/_mapping/{}", index, object_type),
            &[],
            Some(mapping.to_string()),
        )
        .await?
        .error_for_status()?;
        Ok(())
    }

    /// Fetch the alias table
    async fn get_aliases(&self) -> StorageResult<RawResponse> {
        self.request(Method::GET, "/_aliases", &[], None).await
    }

    /// Submit a batch of alias actions
    async fn update_aliases(&self, actions: String) -> StorageResult<RawResponse> {
        self.request(Method::POST, "/_aliases", &[], Some(actions)).await
    }
}

/// Connection backed by a pooled reqwest client
///
/// Closing drops the client, and with it the idle pooled connections.
pub struct HttpConnection {
    client: RwLock<Option<Client>>,
    base_url: String,
}

impl HttpConnection {
    /// Create a connection to `http://{domain}:{port}` keeping at most `max_conns` idle connections
    pub fn new(domain: &str, port: &str, max_conns: usize) -> StorageResult<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(max_conns)
            .build()
            .map_err(|e| {
                StorageError::InvalidConfiguration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client: RwLock::new(Some(client)),
            base_url: format!("http://{}:{}", domain, port),
        })
    }

    pub fn from_config(config: &ElasticsearchConfig) -> StorageResult<Self> {
        let (domain, port) = config.parse_host()?;
        Self::new(&domain, &port, config.max_conns)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_closed(&self) -> bool {
        self.client.read().is_none()
    }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<String>,
    ) -> StorageResult<RawResponse> {
        // cloning shares the pool; requests in flight keep it alive until they finish
        let client = self
            .client
            .read()
            .clone()
            .ok_or(StorageError::ConnectionClosed)?;

        let url = format!("{}{}", self.base_url, path);
        let mut builder = client.request(method.clone(), &url);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            let content_type = if path.ends_with("/_bulk") {
                "application/x-ndjson"
            } else {
                "application/json"
            };
            builder = builder.header(CONTENT_TYPE, content_type).body(body);
        }

        let start = Instant::now();
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                record_request(method.as_str(), "error", start.elapsed().as_secs_f64());
                return Err(StorageError::ConnectionFailed(format!(
                    "{} {} failed: {}",
                    method, path, e
                )));
            }
        };

        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        let elapsed = start.elapsed().as_secs_f64();
        record_request(method.as_str(), &status.to_string(), elapsed);

        debug!(
            method = %method,
            path = %path,
            status,
            response_length = body.len(),
            "Elasticsearch request completed"
        );

        Ok(RawResponse { status, body })
    }

    async fn close(&self) {
        if self.client.write().take().is_some() {
            debug!(base_url = %self.base_url, "Elasticsearch connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_for_status() {
        assert!(RawResponse::new(201, "{}").error_for_status().is_ok());

        let err = RawResponse::new(404, "missing").error_for_status().unwrap_err();
        match err {
            StorageError::UnexpectedStatus { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "missing");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_base_url_from_config() {
        let config = ElasticsearchConfig::builder().host("es.local:9201").build();
        let connection = HttpConnection::from_config(&config).unwrap();
        assert_eq!(connection.base_url(), "http://es.local:9201");
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_requests() {
        let connection = HttpConnection::new("127.0.0.1", "1", 1).unwrap();
        assert!(!connection.is_closed());
        connection.close().await;
        assert!(connection.is_closed());

        // closing twice is harmless
        connection.close().await;

        let result = connection.request(Method::GET, "/", &[], None).await;
        assert!(matches!(result, Err(StorageError::ConnectionClosed)));
    }
}
