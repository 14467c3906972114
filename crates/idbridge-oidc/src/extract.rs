//! Claim extraction: validated claim sets into an [`IdentityDraft`].
//!
//! The draft's attribute map merges three flattened sources in a fixed
//! order: user-info first, then ID token claims, then access token
//! claims, so token claims overwrite profile claims on collision. Each
//! token source is additionally stored under an `id_token.` /
//! `access_token.` prefix so mappers can address a specific source.

use sha2::{Digest, Sha256};
use tracing::debug;

use idbridge_core::{flatten, IdentityDraft};

use crate::claims::ValidatedClaimSet;
use crate::config::OidcProviderConfig;
use crate::error::OidcResult;

/// Broker-scoped user id: the provider alias joined with a SHA-256
/// digest of the subject, keeping the id filesystem- and URL-safe
/// regardless of what the provider puts in `sub`.
#[must_use]
pub fn broker_user_id(provider_alias: &str, subject: &str) -> String {
    let digest = Sha256::digest(subject.as_bytes());
    format!("{provider_alias}.{digest:x}")
}

/// Broker-scoped session id from the provider's session state.
#[must_use]
pub fn broker_session_id(provider_alias: &str, session_state: &str) -> String {
    format!("{provider_alias}.{session_state}")
}

/// Build an identity draft from the validated token/profile claims.
pub fn extract_identity(
    config: &OidcProviderConfig,
    id_claims: &ValidatedClaimSet,
    access_claims: Option<&ValidatedClaimSet>,
    user_info: Option<&ValidatedClaimSet>,
) -> OidcResult<IdentityDraft> {
    let subject = id_claims.subject()?;
    let mut draft = IdentityDraft::new(
        subject,
        broker_user_id(&config.provider_alias, subject),
    );

    if let Some(session_state) = id_claims.session_state() {
        draft.broker_session_id =
            Some(broker_session_id(&config.provider_alias, session_state));
    }

    merge_claims(&mut draft, id_claims, access_claims, user_info);

    draft.username = Some(pick_username(config, id_claims, user_info, subject));
    apply_profile(&mut draft, id_claims, user_info);

    debug!(
        subject = %draft.subject,
        username = ?draft.username,
        attributes = draft.attributes.len(),
        "extracted identity"
    );
    Ok(draft)
}

/// Username priority: user-info `sub`, then the configured claim path
/// in user-info, then the same path in the ID token, then the token
/// subject.
fn pick_username(
    config: &OidcProviderConfig,
    id_claims: &ValidatedClaimSet,
    user_info: Option<&ValidatedClaimSet>,
    subject: &str,
) -> String {
    if let Some(info) = user_info {
        if let Some(sub) = info.get_str("sub") {
            return sub.to_string();
        }
        if let Some(path) = config.username_claim_path.as_deref() {
            if let Some(value) = info.get_path(path).and_then(|v| v.as_str()) {
                return value.to_string();
            }
        }
    }
    if let Some(path) = config.username_claim_path.as_deref() {
        if let Some(value) = id_claims.get_path(path).and_then(|v| v.as_str()) {
            return value.to_string();
        }
    }
    subject.to_string()
}

fn merge_claims(
    draft: &mut IdentityDraft,
    id_claims: &ValidatedClaimSet,
    access_claims: Option<&ValidatedClaimSet>,
    user_info: Option<&ValidatedClaimSet>,
) {
    let mut merged = std::collections::BTreeMap::new();

    if let Some(info) = user_info {
        merged.append(&mut flatten(&info.to_value()));
    }
    // Token claims overwrite profile claims on key collision.
    for (key, value) in flatten(&id_claims.to_value()) {
        merged.insert(format!("id_token.{key}"), value.clone());
        merged.insert(key, value);
    }
    if let Some(access) = access_claims {
        for (key, value) in flatten(&access.to_value()) {
            merged.insert(format!("access_token.{key}"), value.clone());
            merged.insert(key, value);
        }
    }

    for (key, value) in merged {
        draft.set_attribute(key, value);
    }
}

/// Standard profile claims, preferring user-info over the ID token.
///
/// Providers that nest profile fields under their own paths
/// (`contact.email`, `profile.given_name.value`) override the
/// standard claims; map order decides on collision, last write wins.
/// When neither name part exists, the `name` display claim is split
/// into the two.
fn apply_profile(
    draft: &mut IdentityDraft,
    id_claims: &ValidatedClaimSet,
    user_info: Option<&ValidatedClaimSet>,
) {
    let lookup = |name: &str| -> Option<String> {
        user_info
            .and_then(|info| info.get_str(name))
            .or_else(|| id_claims.get_str(name))
            .map(str::to_string)
    };

    draft.email = lookup("email");
    draft.first_name = lookup("given_name");
    draft.last_name = lookup("family_name");

    for (key, values) in &draft.attributes {
        if is_standard_profile_key(key) {
            continue;
        }
        let Some(value) = values.first() else {
            continue;
        };
        let field = key.strip_suffix(".value").unwrap_or(key);
        if field.ends_with("email") {
            draft.email = Some(value.clone());
        } else if field.ends_with("given_name") {
            draft.first_name = Some(value.clone());
        } else if field.ends_with("family_name") {
            draft.last_name = Some(value.clone());
        }
    }

    if draft.first_name.is_none() && draft.last_name.is_none() {
        if let Some(full) = lookup("name") {
            match full.rsplit_once(' ') {
                Some((given, family)) => {
                    draft.first_name = Some(given.to_string());
                    draft.last_name = Some(family.to_string());
                }
                None => draft.first_name = Some(full),
            }
        }
    }
}

/// The standard claims (and their per-token prefixed copies) are
/// already applied by the direct lookup; skipping them keeps a nested
/// override from being clobbered by its own flattened original.
fn is_standard_profile_key(key: &str) -> bool {
    let bare = key
        .strip_prefix("id_token.")
        .or_else(|| key.strip_prefix("access_token."))
        .unwrap_or(key);
    matches!(bare, "email" | "given_name" | "family_name" | "name")
}
