//! Error types for squash-core

use std::path::PathBuf;

use thiserror::Error;

use crate::transport::TransportError;

/// Main error type for the squash-core library
#[derive(Error, Debug)]
pub enum Error {
    /// A field required before hooking is unset
    #[error("configuration error: SquashClient needs {0}")]
    MissingConfig(&'static str),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Local occurrence storage failed
    #[error("storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Another interceptor already owns the process-wide hooks
    #[error("an interceptor is already hooked in this process")]
    AlreadyHooked,

    /// Collector transport error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl Error {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for squash-core
pub type Result<T> = std::result::Result<T, Error>;
