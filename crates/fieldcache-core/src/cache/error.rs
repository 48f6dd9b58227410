use std::path::PathBuf;

use thiserror::Error;

use super::Namespace;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode {namespace} record {key}: {source}")]
    Encode {
        namespace: Namespace,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Corrupt record file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for local store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
