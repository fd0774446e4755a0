//! Common error types for the projection-mapping cache

use thiserror::Error;

/// Common result type for projection-mapping operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the builder, the store and the reader
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown fitting-engine variant, missing or malformed configuration key
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store operation error (wraps sqlx::Error)
    #[error("Storage error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Region or region pair not present in the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Fitting engine failed for one unit of work
    #[error("Fit failure: {0}")]
    Fit(String),

    /// Invalid region identifier or malformed stored dataset
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Attempt to overwrite a record that is already complete
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl Error {
    /// True for failures of the underlying store (fatal for a build pass)
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Io(_))
    }
}
