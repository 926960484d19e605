//! HS256 JWT implementation of the token issuer.

use crate::{IssuerError, IssuerResult, TokenIssuer};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Audience claim consumed by the downstream identity toolkit when it
/// exchanges a custom token for a session.
pub const TOKEN_AUDIENCE: &str =
    "https://identitytoolkit.googleapis.com/google.identity.identitytoolkit.v1.IdentityToolkit";

/// Claim set of a minted custom token.
#[derive(Debug, Serialize, Deserialize)]
struct CustomTokenClaims {
    iss: String,
    sub: String,
    aud: String,
    iat: i64,
    exp: i64,
    uid: String,
    claims: Value,
}

/// [`TokenIssuer`] signing HS256 JWTs with a shared secret.
pub struct JwtTokenIssuer {
    encoding_key: EncodingKey,
    issuer: String,
    ttl: Duration,
}

impl JwtTokenIssuer {
    /// Create an issuer from a signing secret.
    ///
    /// # Arguments
    /// * `secret` - HMAC signing secret; must be non-empty
    /// * `issuer` - value of the `iss` and `sub` claims
    /// * `ttl` - token lifetime
    pub fn new(secret: &str, issuer: impl Into<String>, ttl: Duration) -> IssuerResult<Self> {
        if secret.is_empty() {
            return Err(IssuerError::Config(
                "signing secret must not be empty".to_string(),
            ));
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
            ttl,
        })
    }
}

impl TokenIssuer for JwtTokenIssuer {
    fn mint(&self, subject_id: &str, claims: &Value) -> IssuerResult<String> {
        let iat = chrono::Utc::now().timestamp();
        let token_claims = CustomTokenClaims {
            iss: self.issuer.clone(),
            sub: self.issuer.clone(),
            aud: TOKEN_AUDIENCE.to_string(),
            iat,
            exp: iat + self.ttl.as_secs() as i64,
            uid: subject_id.to_string(),
            claims: claims.clone(),
        };

        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &token_claims,
            &self.encoding_key,
        )?;
        Ok(token)
    }
}

impl std::fmt::Debug for JwtTokenIssuer {
    /// Opaque debug output; the encoding key never leaves this struct.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtTokenIssuer")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
