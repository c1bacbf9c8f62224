//! Persistent storage
//!
//! Settings persistence and the on-disk model registry. Conversation history
//! is deliberately not persisted: the chat session lives in memory only and
//! dies with the loaded model.

pub mod models;
pub mod settings;

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the storage layer
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    DataDir(String),
}

/// Platform data directory for the application
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    directories::ProjectDirs::from("dev", "codeloom", "codeloom")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| StorageError::DataDir("could not determine platform data directory".into()))
}
