//! Error types for Hotpath.

use thiserror::Error;

/// Main error type for Hotpath operations.
///
/// Durable-tier faults are deliberately absent: they are reported as
/// [`crate::cache::StoreError`] by the store and absorbed by the cache facade.
#[derive(Error, Debug)]
pub enum HotpathError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A rate limiter was looked up before it was registered
    #[error("Rate limiter not registered: {0}")]
    NotRegistered(String),

    /// A cancellable wait was abandoned before it completed
    #[error("Wait cancelled: {0}")]
    Cancelled(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Hotpath operations.
pub type Result<T> = std::result::Result<T, HotpathError>;
