//! CLI output: error mapping from domain errors to the CLI surface.

use crate::error::{EngineError, StorageError};

/// Map engine errors to a one-line message for the terminal.
pub fn map_error(e: &EngineError) -> String {
    match e {
        EngineError::Storage(StorageError::NotFound { kind, id }) => {
            format!("{} '{}' does not exist", kind, id)
        }
        EngineError::ConfigError(msg) => format!("configuration error: {}", msg),
        other => other.to_string(),
    }
}
