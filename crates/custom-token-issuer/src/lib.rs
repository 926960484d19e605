//! Custom token issuing for the login relay.
//!
//! After a provider vouches for a subject, the relay mints a signed token
//! the downstream authentication system can accept. The token binds the
//! verified subject id and carries the provider's payload as claims.

mod error;
mod issuer;

pub use error::{IssuerError, IssuerResult};
pub use issuer::{JwtTokenIssuer, TOKEN_AUDIENCE};

use serde_json::Value;

/// The token-minting seam the reconciliation loop calls through.
///
/// Minting failures surface to the loop exactly like verification
/// failures.
pub trait TokenIssuer: Send + Sync {
    /// Mint a signed token asserting `subject_id`, embedding `claims`.
    fn mint(&self, subject_id: &str, claims: &Value) -> IssuerResult<String>;
}
