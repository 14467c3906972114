//! Validated claim set with typed accessors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ClaimValidationKind, OidcError, OidcResult};

/// A claim set that passed signature/decryption handling.
///
/// Wraps the raw JSON object so extraction code can reach arbitrary
/// nested claims while the standard ones get typed accessors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidatedClaimSet {
    claims: Map<String, Value>,
}

impl ValidatedClaimSet {
    /// Wrap a parsed JSON object; anything else is a format error.
    pub fn from_value(value: Value) -> OidcResult<Self> {
        match value {
            Value::Object(claims) => Ok(Self { claims }),
            other => Err(OidcError::TokenFormat(format!(
                "claims payload is not a JSON object but {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Parse a raw JSON payload.
    pub fn from_slice(payload: &[u8]) -> OidcResult<Self> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| OidcError::TokenFormat(format!("claims are not valid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Mandatory subject claim.
    pub fn subject(&self) -> OidcResult<&str> {
        self.get_str("sub")
            .ok_or(OidcError::ClaimValidation(ClaimValidationKind::MissingSubject))
    }

    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.get_str("iss")
    }

    #[must_use]
    pub fn expiry(&self) -> Option<i64> {
        self.claims.get("exp").and_then(Value::as_i64)
    }

    #[must_use]
    pub fn not_before(&self) -> Option<i64> {
        self.claims.get("nbf").and_then(Value::as_i64)
    }

    #[must_use]
    pub fn issued_at(&self) -> Option<i64> {
        self.claims.get("iat").and_then(Value::as_i64)
    }

    /// `azp` — the party the token was issued for.
    #[must_use]
    pub fn authorized_party(&self) -> Option<&str> {
        self.get_str("azp")
    }

    /// OIDC session state, when the provider maintains one.
    #[must_use]
    pub fn session_state(&self) -> Option<&str> {
        self.get_str("session_state")
    }

    /// Whether `aud` (string or array form) contains `client_id`.
    #[must_use]
    pub fn audience_contains(&self, client_id: &str) -> bool {
        match self.claims.get("aud") {
            Some(Value::String(aud)) => aud == client_id,
            Some(Value::Array(items)) => items
                .iter()
                .any(|v| v.as_str() == Some(client_id)),
            _ => false,
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }

    /// Walk a dot-separated path through nested objects.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.claims.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// The claim set as a JSON value, for flattening.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.claims.clone())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
