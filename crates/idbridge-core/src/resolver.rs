//! Tiered identity resolution and federation-link upsert.
//!
//! Matches an [`IdentityDraft`] against the local user base before the
//! caller falls back to new-user creation. The lookup tiers are
//! username, then email, then an ordered list of stable attributes.
//! A match triggers the anti-duplication link upsert: a rotated
//! subject id replaces the stale link instead of creating a second
//! account.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::draft::IdentityDraft;
use crate::error::{CoreError, CoreResult};
use crate::link::FederationLink;
use crate::store::UserStore;
use crate::user::User;

/// Attribute names tried, in order, when username and email both miss.
pub const DEFAULT_STABLE_ATTRIBUTES: &[&str] = &[
    "uinfin.value",
    "id_token.entityInfo.CPEntID",
    "user_id",
    "external_id",
    "unique_identifier",
];

/// Resolution behavior knobs.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Ordered attribute names used as fallback matching keys.
    pub stable_attributes: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            stable_attributes: DEFAULT_STABLE_ATTRIBUTES
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Outcome of resolving a draft against the local store.
#[derive(Debug, Clone)]
pub enum ResolutionOutcome {
    /// No existing user matched; the caller proceeds with creation.
    NoMatch,
    /// An existing user already linked to this provider was matched;
    /// the link was refreshed if the subject id had rotated.
    Relinked(User),
    /// An existing user with no prior link for this provider was
    /// matched and a link was inserted.
    NewlyLinked(User),
}

/// The resolution engine.
pub struct ResolutionEngine {
    store: Arc<dyn UserStore>,
    config: ResolverConfig,
}

impl ResolutionEngine {
    #[must_use]
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self {
            store,
            config: ResolverConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(store: Arc<dyn UserStore>, config: ResolverConfig) -> Self {
        Self { store, config }
    }

    /// Resolve `draft` for the given provider.
    ///
    /// On a match the draft's username/email/name fields are
    /// overwritten with the existing user's values (existing data wins
    /// over incoming claims) and `resolved_user_id` is set. On
    /// `NoMatch` the draft passes through unchanged.
    #[instrument(skip(self, draft), fields(provider_alias))]
    pub async fn resolve(
        &self,
        draft: &mut IdentityDraft,
        provider_alias: &str,
    ) -> CoreResult<ResolutionOutcome> {
        if draft.subject.is_empty() {
            return Err(CoreError::MissingSubject);
        }

        let Some(user) = self.find_existing_user(draft).await? else {
            debug!("no existing user matched, passing draft through");
            return Ok(ResolutionOutcome::NoMatch);
        };

        let outcome = self.upsert_link(draft, provider_alias, &user).await?;

        // Existing user data wins over incoming claims.
        draft.username = Some(user.username.clone());
        draft.email = user.email.clone();
        draft.first_name = user.first_name.clone();
        draft.last_name = user.last_name.clone();
        draft.resolved_user_id = Some(user.id);

        Ok(outcome)
    }

    /// Tiered lookup: username, email, then stable attributes.
    /// First match wins and short-circuits the remaining tiers.
    async fn find_existing_user(&self, draft: &IdentityDraft) -> CoreResult<Option<User>> {
        if let Some(username) = draft.username.as_deref() {
            if let Some(user) = self.store.find_by_username(username).await? {
                debug!(user_id = %user.id, "matched existing user by username");
                return Ok(Some(user));
            }
        }

        if let Some(email) = draft.email.as_deref() {
            if let Some(user) = self.store.find_by_email(email).await? {
                debug!(user_id = %user.id, "matched existing user by email");
                return Ok(Some(user));
            }
        }

        for name in &self.config.stable_attributes {
            let Some(value) = draft.attribute(name) else {
                continue;
            };
            let matches = self.store.find_by_attribute(name, value).await?;
            if matches.is_empty() {
                continue;
            }
            if matches.len() > 1 {
                // Duplicate stable-attribute values must be resolved
                // upstream; taking the first result is arbitrary.
                warn!(
                    attribute = %name,
                    count = matches.len(),
                    "multiple users matched a stable attribute, taking first"
                );
            }
            let user = matches.into_iter().next();
            if let Some(ref u) = user {
                debug!(user_id = %u.id, attribute = %name, "matched existing user by stable attribute");
            }
            return Ok(user);
        }

        Ok(None)
    }

    /// Refresh or create the federation link for `user`.
    async fn upsert_link(
        &self,
        draft: &IdentityDraft,
        provider_alias: &str,
        user: &User,
    ) -> CoreResult<ResolutionOutcome> {
        match self.store.federation_link(user.id, provider_alias).await? {
            Some(existing) if existing.subject != draft.subject => {
                // Subject rotation: replace the stale link, keeping the
                // local username and any previously stored token.
                info!(
                    user_id = %user.id,
                    "provider subject rotated, replacing federation link"
                );
                self.store
                    .remove_federation_link(user.id, provider_alias)
                    .await?;
                let mut link = FederationLink::new(
                    provider_alias,
                    &draft.subject,
                    user.id,
                    &existing.username,
                );
                link.stored_token = existing
                    .stored_token
                    .or_else(|| draft.stored_token.as_deref().map(stamp_token_expiry));
                self.store.add_federation_link(link).await?;
                Ok(ResolutionOutcome::Relinked(user.clone()))
            }
            Some(_) => {
                // Unchanged subject: zero writes.
                Ok(ResolutionOutcome::Relinked(user.clone()))
            }
            None => {
                info!(user_id = %user.id, "linking matched user to provider");
                let mut link =
                    FederationLink::new(provider_alias, &draft.subject, user.id, &user.username);
                link.stored_token = draft.stored_token.as_deref().map(stamp_token_expiry);
                self.store.add_federation_link(link).await?;
                Ok(ResolutionOutcome::NewlyLinked(user.clone()))
            }
        }
    }
}

/// Stamp an absolute `exp` into a serialized token response that only
/// carries a relative `expires_in`, so the stored copy stays
/// interpretable after the fact. Tokens that are not JSON objects are
/// stored as-is.
fn stamp_token_expiry(raw: &str) -> String {
    let Ok(mut value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return raw.to_string();
    };
    let Some(obj) = value.as_object_mut() else {
        return raw.to_string();
    };
    if obj.contains_key("exp") {
        return raw.to_string();
    }
    if let Some(expires_in) = obj.get("expires_in").and_then(serde_json::Value::as_i64) {
        obj.insert(
            "exp".to_string(),
            serde_json::Value::from(Utc::now().timestamp() + expires_in),
        );
        return value.to_string();
    }
    raw.to_string()
}
