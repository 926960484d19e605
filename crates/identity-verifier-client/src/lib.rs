//! Verifier client for the login relay.
//!
//! A login record names its verification provider by URL and carries a
//! pre-signed credentials header. Verification is one `GET` against that
//! URL with the credentials presented as the `Authorization` header; the
//! provider echoes the verified identity back as JSON. This crate owns
//! that network boundary and nothing else — no retry, no caching.

mod client;
mod error;

pub use client::{HttpVerifierClient, VerificationResult, SUBJECT_ID_FIELD};
pub use error::{VerifierError, VerifierResult};

use async_trait::async_trait;

/// The verification seam the reconciliation loop calls through.
///
/// Exactly one call is made per observed record; implementations must not
/// retry internally. Any transport or provider failure surfaces as an
/// error outcome to the caller.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Present `credentials` to the provider at `service_provider` and
    /// return the verified identity payload.
    async fn verify(
        &self,
        service_provider: &str,
        credentials: &str,
    ) -> VerifierResult<VerificationResult>;
}
