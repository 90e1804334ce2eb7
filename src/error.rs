//! Error types for the clusterflow workflow engine.

use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failures raised while rebuilding the runtime handlers of a persisted operation.
///
/// Recovery validates everything before it mutates anything, so any of these
/// leaves the operation and its cluster untouched.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("Unsupported operation type: {0}")]
    UnsupportedType(String),

    #[error("Operation type '{kind}' requires parameter '{key}'")]
    MissingParameter { kind: String, key: String },

    #[error("Invalid parameter '{key}': {reason}")]
    InvalidParameter { key: String, reason: String },

    #[error("Operation {operation_id} cannot be recovered from status {status}")]
    NotRecoverable { operation_id: String, status: String },
}

/// Engine errors. The first four variants are the step-failure taxonomy; the
/// rest cover engine plumbing.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Dispatch to node {node_id} failed: {reason}")]
    Dispatch { node_id: String, reason: String },

    #[error("Node {node_id} reported an error: {message}")]
    Remote { node_id: String, message: String },

    #[error("Node {node_id} timed out on task {correlation_id} ({attempts} attempt(s))")]
    Timeout {
        node_id: String,
        correlation_id: String,
        attempts: u32,
    },

    #[error("Recovery failed: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Step generator for step '{step}' failed: {message}")]
    Generator { step: String, message: String },

    #[error("Operation {0} is already running")]
    AlreadyRunning(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::ConfigError(err.to_string())
    }
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::IoError(std::io::Error::new(
            std::io::ErrorKind::Other,
            err.to_string(),
        ))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
