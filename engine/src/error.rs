//! Error types for the keysync engine.

use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// All possible errors from the keysync engine.
#[derive(Debug, Error)]
pub enum Error {
    // Store errors
    #[error("{context}: {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },

    #[error("transaction on prefix '{prefix}' was aborted by the store")]
    TransactionAborted { prefix: String },

    // Key space errors
    #[error("'{prefix}' cannot be a prefix as it cannot be incremented")]
    Unrepresentable { prefix: String },

    // Filesystem errors
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("path is not valid utf-8: {0}")]
    NonUtf8Path(PathBuf),

    #[error("key suffix '{suffix}' does not stay inside the directory")]
    UnsafePath { suffix: String },

    // Parsing errors
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid permission '{0}': expected one of read, write, readwrite")]
    InvalidPermission(String),

    #[error("invalid recurrence '{0}': expected one of once, onchange, always")]
    InvalidRecurrence(String),

    #[error("invalid sync source '{0}': expected one of directory, key-prefix")]
    InvalidSyncSource(String),
}

impl Error {
    /// Wrap a store error with the operation it came from.
    pub fn store(context: impl Into<String>, source: StoreError) -> Self {
        Error::Store {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// The transport-level error underneath, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Error::Store { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
