//! Error types for the canopy clustering engine.

use crate::types::ObjectId;
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Tree not found: {0}")]
    TreeNotFound(ObjectId),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::IoError(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("sled error: {}", err),
        ))
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Errors surfaced by a clustering session
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),

    #[error("Clustering session already disposed")]
    Disposed,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<config::ConfigError> for ClusterError {
    fn from(err: config::ConfigError) -> Self {
        ClusterError::ConfigError(err.to_string())
    }
}
