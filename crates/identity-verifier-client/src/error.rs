//! Error types for verification calls.

use thiserror::Error;

/// Error type for all verifier client operations.
#[derive(Debug, Error)]
pub enum VerifierError {
    /// Network or transport-level HTTP error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The record named a service provider that is not a valid URL.
    #[error("Invalid service provider URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The provider returned a non-success HTTP status.
    ///
    /// Carries the status code and a body summary; the raw body is never
    /// propagated since it may echo credentials.
    #[error("Provider error: {status} ({body_summary})")]
    Provider {
        /// HTTP status code returned by the provider.
        status: u16,
        /// Length/digest summary of the response body.
        body_summary: String,
    },

    /// The provider's success body did not parse as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The provider's payload carried no subject identifier.
    #[error("Provider response missing subject id field `{0}`")]
    MissingSubject(&'static str),
}

/// Convenience Result type alias for verifier operations.
pub type VerifierResult<T> = Result<T, VerifierError>;
