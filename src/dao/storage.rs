use std::{io, path::PathBuf};

use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by log store backends regardless of the underlying medium.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing a backing file failed.
    #[error("storage io failure on `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A persisted record could not be interpreted.
    #[error("corrupt {what}: {detail}")]
    Corrupt { what: &'static str, detail: String },
}

impl StorageError {
    /// Wrap an io failure together with the file it happened on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    /// Construct a corruption error for a persisted record.
    pub fn corrupt(what: &'static str, detail: impl Into<String>) -> Self {
        StorageError::Corrupt {
            what,
            detail: detail.into(),
        }
    }
}
