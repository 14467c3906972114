//! The transient result of a successful verification.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Extracted identity, prior to resolution against the local store.
///
/// Created once per successful verification, mutated during extraction
/// and resolution, and discarded after the caller persists or rejects
/// it. Never persisted itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityDraft {
    /// External subject identifier as issued by the provider.
    pub subject: String,
    /// Broker-scoped user id, `provider_alias + "." + <derived>`.
    pub broker_user_id: String,
    /// Broker-scoped session id, when the provider supplied one.
    pub broker_session_id: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Flattened claims/attributes; values keep insertion order.
    pub attributes: BTreeMap<String, Vec<String>>,
    /// Serialized token response to persist on the federation link.
    pub stored_token: Option<String>,
    /// Raw validated ID token, for callers that need to re-inspect it.
    pub id_token: Option<String>,
    /// Raw access token from the provider response.
    pub access_token: Option<String>,
    /// Raw assertion XML for SAML flows.
    pub assertion_xml: Option<String>,
    /// Set by resolution when the draft matched an existing user;
    /// signals the caller to skip new-user creation.
    pub resolved_user_id: Option<Uuid>,
}

impl IdentityDraft {
    /// Create a draft for an external subject.
    #[must_use]
    pub fn new(subject: impl Into<String>, broker_user_id: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            broker_user_id: broker_user_id.into(),
            ..Self::default()
        }
    }

    /// Replace any existing values for `name` with a single value.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), vec![value.into()]);
    }

    /// Append a value to `name`, preserving earlier values.
    pub fn add_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.entry(name.into()).or_default().push(value.into());
    }

    /// First value of `name`, if any.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    /// Whether resolution matched this draft to an existing user.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved_user_id.is_some()
    }
}
