//! reqwest-backed verification provider client.

use crate::{CredentialVerifier, VerifierError, VerifierResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use url::Url;

/// Field of the provider payload carrying the verified subject identifier.
pub const SUBJECT_ID_FIELD: &str = "id_str";

/// Summarize a response body without exposing its content; provider error
/// bodies can echo the credentials they rejected.
fn summarize_response_body(body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("len={},digest={:016x}", body.len(), hasher.finish())
}

/// The identity a provider vouched for.
#[derive(Debug, Clone)]
pub struct VerificationResult {
    /// Verified subject identifier (the payload's `id_str`).
    pub subject_id: String,
    /// The provider's full response payload, used as token claims.
    pub payload: Value,
}

/// HTTP [`CredentialVerifier`] performing single-shot provider calls.
#[derive(Clone, Default)]
pub struct HttpVerifierClient {
    http_client: reqwest::Client,
}

impl HttpVerifierClient {
    /// Create a new verifier client with a fresh connection pool.
    pub fn new() -> Self {
        Self {
            http_client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CredentialVerifier for HttpVerifierClient {
    async fn verify(
        &self,
        service_provider: &str,
        credentials: &str,
    ) -> VerifierResult<VerificationResult> {
        let url = Url::parse(service_provider)?;

        tracing::debug!(provider = %url, "Verifying credentials with provider");

        let response = self
            .http_client
            .get(url)
            .header("Authorization", credentials)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let body_summary = summarize_response_body(&body);
            tracing::warn!(status = %status, body_summary = %body_summary, "Provider rejected credentials");
            return Err(VerifierError::Provider {
                status: status.as_u16(),
                body_summary,
            });
        }

        let payload: Value = response.json().await?;
        let subject_id = payload
            .get(SUBJECT_ID_FIELD)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(VerifierError::MissingSubject(SUBJECT_ID_FIELD))?
            .to_string();

        tracing::debug!(subject_id = %subject_id, "Provider verified credentials");

        Ok(VerificationResult {
            subject_id,
            payload,
        })
    }
}
