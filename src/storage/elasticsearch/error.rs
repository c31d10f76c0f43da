//! Error types for Elasticsearch storage operations

use crate::error::AppError;

/// Result type for Elasticsearch storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors that can occur while talking to Elasticsearch
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The `host` entry is not a single `host:port` pair
    #[error("elasticsearch : Config file is misconfigured, check elasticsearch key format")]
    BadConfig,

    /// Invalid configuration values
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The engine could not be reached
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection was closed by `stop`
    #[error("Connection closed")]
    ConnectionClosed,

    /// The engine answered with a non-success status
    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// Versioned index could neither be opened nor created
    #[error("Unable to create the {index} index: {reason}")]
    IndexCreationFailed { index: String, reason: String },

    /// A mapping was rejected
    #[error("Unable to create {object_type} mapping: {reason}")]
    MappingFailed { object_type: String, reason: String },

    /// The alias table returned by the engine is not valid JSON
    #[error("Unable to parse aliases: {0}")]
    AliasParseFailed(String),

    /// The alias batch was rejected
    #[error("Unable to create an alias to the {alias} index: {status}")]
    AliasUpdateFailed { alias: String, status: u16 },

    /// Bulk queue is not accepting documents
    #[error("Bulk indexer unavailable: {0}")]
    BulkUnavailable(String),

    /// Bulk queue already holds `capacity` operations waiting for the worker
    #[error("Bulk queue full ({capacity} operations pending)")]
    BulkQueueFull { capacity: usize },

    /// `stop` was called before startup completed
    #[error("Client stopped")]
    Stopped,

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// Startup gave up after the configured number of attempts
    #[error("Startup abandoned after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl StorageError {
    /// Whether the error comes from the engine or the network, as opposed to local
    /// input or shutdown. Only these are worth retrying during startup.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            StorageError::ConnectionFailed(_)
                | StorageError::UnexpectedStatus { .. }
                | StorageError::IndexCreationFailed { .. }
                | StorageError::MappingFailed { .. }
                | StorageError::AliasParseFailed(_)
                | StorageError::AliasUpdateFailed { .. }
        )
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::ConnectionFailed(err.to_string())
    }
}

impl From<validator::ValidationErrors> for StorageError {
    fn from(err: validator::ValidationErrors) -> Self {
        StorageError::InvalidConfiguration(err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::BadConfig | StorageError::InvalidConfiguration(_) => {
                AppError::Configuration(err.to_string())
            }
            StorageError::ConnectionFailed(msg) => AppError::Network(msg),
            StorageError::UnexpectedStatus { status: 404, body } => AppError::NotFound(body),
            StorageError::SerializationError(msg) | StorageError::DeserializationError(msg) => {
                AppError::Serialization(msg)
            }
            _ => AppError::Storage(err.to_string()),
        }
    }
}
