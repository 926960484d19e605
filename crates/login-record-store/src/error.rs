//! Error types for record store operations.

use thiserror::Error;

/// Error type for all record store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A path string or segment failed validation.
    #[error("Invalid store path: {0}")]
    InvalidPath(String),

    /// The backing store reported a failure (transport, permission, etc.).
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Convenience Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
