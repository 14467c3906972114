//! The capability implemented by both protocol verifiers.

use async_trait::async_trait;

use crate::draft::IdentityDraft;

/// Verify a raw provider response into an [`IdentityDraft`].
///
/// Implemented by the OIDC and SAML verifiers; provider configuration
/// is held by the implementor, so callers only supply the raw payload
/// and the relay state that correlates it with an outstanding request.
#[async_trait]
pub trait Verifier: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn verify(
        &self,
        raw: &str,
        relay_state: Option<&str>,
    ) -> Result<IdentityDraft, Self::Error>;
}
