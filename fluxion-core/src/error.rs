//! # Error Handling
//!
//! Error types for FluxionDB operations.
//!
//! ## Design Principles
//!
//! 1. **Contextual**: Errors include relevant context (paths, collection names)
//! 2. **Forgiving**: Query misses and empty ranges are empty results, never errors
//! 3. **Recoverable**: Store write failures leave records dirty for the next flush

use thiserror::Error;

/// Result type alias for FluxionDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for FluxionDB
#[derive(Error, Debug)]
pub enum Error {
    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("transaction error: {message}")]
    Transaction { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Get error code for monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Storage { .. } => "STORAGE_ERROR",
            Error::Transaction { .. } => "TRANSACTION_ERROR",
            Error::Configuration { .. } => "CONFIG_ERROR",
            Error::Io { .. } => "IO_ERROR",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}
