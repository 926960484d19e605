//! Error types for token minting.

use thiserror::Error;

/// Error type for token issuer operations.
#[derive(Debug, Error)]
pub enum IssuerError {
    /// Signing or encoding failed.
    #[error("Token signing error: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    /// The issuer was built with unusable key material.
    #[error("Issuer configuration error: {0}")]
    Config(String),
}

/// Convenience Result type alias for issuer operations.
pub type IssuerResult<T> = Result<T, IssuerError>;
