//! Per-provider verification configuration.

/// Default clock skew tolerance in seconds.
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 300;

/// Configuration for one OIDC identity provider.
#[derive(Debug, Clone)]
pub struct OidcProviderConfig {
    /// Alias identifying this provider in broker-scoped ids and
    /// federation links.
    pub provider_alias: String,
    /// Our client id at the provider.
    pub client_id: String,
    /// Comma-separated list of trusted issuers. Empty or unset accepts
    /// any issuer.
    pub trusted_issuers: Option<String>,
    /// Tolerance applied to expiry/not-before checks.
    pub clock_skew_secs: i64,
    /// Whether JWS signatures are verified at all. Disabled only in
    /// test realms.
    pub validate_signature: bool,
    /// JWKS endpoint. When unset, statically configured realm keys
    /// verify signatures instead.
    pub jwks_url: Option<String>,
    /// User-info endpoint, fetched with the access token when set.
    pub user_info_url: Option<String>,
    /// Nested claim path used as the username fallback (e.g.
    /// `uinfin.value` for a national-id style claim).
    pub username_claim_path: Option<String>,
}

impl OidcProviderConfig {
    #[must_use]
    pub fn new(provider_alias: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            provider_alias: provider_alias.into(),
            client_id: client_id.into(),
            trusted_issuers: None,
            clock_skew_secs: DEFAULT_CLOCK_SKEW_SECS,
            validate_signature: true,
            jwks_url: None,
            user_info_url: None,
            username_claim_path: None,
        }
    }

    #[must_use]
    pub fn trusted_issuers(mut self, issuers: impl Into<String>) -> Self {
        self.trusted_issuers = Some(issuers.into());
        self
    }

    #[must_use]
    pub fn clock_skew(mut self, secs: i64) -> Self {
        self.clock_skew_secs = secs;
        self
    }

    #[must_use]
    pub fn jwks_url(mut self, url: impl Into<String>) -> Self {
        self.jwks_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn user_info_url(mut self, url: impl Into<String>) -> Self {
        self.user_info_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn username_claim_path(mut self, path: impl Into<String>) -> Self {
        self.username_claim_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn skip_signature_validation(mut self) -> Self {
        self.validate_signature = false;
        self
    }

    /// Parsed trusted-issuer list; empty means any issuer is accepted.
    #[must_use]
    pub fn trusted_issuer_list(&self) -> Vec<&str> {
        self.trusted_issuers
            .as_deref()
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|i| !i.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trusted_issuer_list_splits_and_trims() {
        let config = OidcProviderConfig::new("idp", "client")
            .trusted_issuers("https://a.example, https://b.example ,");

        assert_eq!(
            config.trusted_issuer_list(),
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn test_empty_issuer_list_when_unset() {
        let config = OidcProviderConfig::new("idp", "client");
        assert!(config.trusted_issuer_list().is_empty());
    }
}
