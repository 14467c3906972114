//! Federation link between a local user and an external subject.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted mapping from (provider, external subject) to a local user.
///
/// Invariant: at most one enabled link per (provider alias, local
/// user). Subject rotation replaces the link — the stale entry is
/// removed before the new one is inserted, never kept alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationLink {
    pub provider_alias: String,
    /// External subject id as last issued by the provider.
    pub subject: String,
    pub user_id: Uuid,
    /// Local username at link time; preserved across subject rotation.
    pub username: String,
    /// Serialized provider token, when the realm stores tokens.
    pub stored_token: Option<String>,
}

impl FederationLink {
    #[must_use]
    pub fn new(
        provider_alias: impl Into<String>,
        subject: impl Into<String>,
        user_id: Uuid,
        username: impl Into<String>,
    ) -> Self {
        Self {
            provider_alias: provider_alias.into(),
            subject: subject.into(),
            user_id,
            username: username.into(),
            stored_token: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.stored_token = Some(token.into());
        self
    }
}
