//! Typed view over a login record snapshot.

use serde_json::{Map, Value};

/// Field written by clients naming the verification endpoint.
pub const SERVICE_PROVIDER_FIELD: &str = "X-Auth-Service-Provider";
/// Field written by clients carrying the signed credentials header value.
pub const CREDENTIALS_FIELD: &str = "X-Verify-Credentials-Authorization";
/// Field carrying a minted (or stray) custom token.
pub const TOKEN_FIELD: &str = "token";
/// Field carrying a recorded verification failure.
pub const ERROR_FIELD: &str = "error";
/// Field added to quarantined copies naming the record's original key.
pub const UID_FIELD: &str = "uid";

/// A pending or resolved login attempt as read from the store.
///
/// Wraps the raw JSON object so quarantine can relocate the full record,
/// whatever extra fields clients wrote. Field accessors treat empty strings
/// and non-string values as absent.
#[derive(Debug, Clone)]
pub struct LoginRecord {
    raw: Map<String, Value>,
}

impl LoginRecord {
    /// Build a record view from a store snapshot. Returns None when the
    /// snapshot is not a JSON object (such a child has no recognizable
    /// marker fields and is handled as an incomplete record).
    pub fn from_snapshot(value: &Value) -> Option<Self> {
        value.as_object().map(|raw| Self { raw: raw.clone() })
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.raw
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// The verification endpoint URL, when present and non-empty.
    pub fn service_provider(&self) -> Option<&str> {
        self.field(SERVICE_PROVIDER_FIELD)
    }

    /// The credentials header value, when present and non-empty.
    pub fn credentials(&self) -> Option<&str> {
        self.field(CREDENTIALS_FIELD)
    }

    /// A previously issued token left on the record, when present.
    pub fn token(&self) -> Option<&str> {
        self.field(TOKEN_FIELD)
    }

    /// A previously recorded failure, when present.
    pub fn error(&self) -> Option<&str> {
        self.field(ERROR_FIELD)
    }

    /// A copy of the full record with the original store key added under
    /// `uid`. Quarantined records carry their provenance this way.
    pub fn tagged_copy(&self, key: &str) -> Value {
        let mut tagged = self.raw.clone();
        tagged.insert(UID_FIELD.to_string(), Value::String(key.to_string()));
        Value::Object(tagged)
    }
}
