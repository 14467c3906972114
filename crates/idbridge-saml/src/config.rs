//! Per-provider SAML configuration.

/// Default clock skew tolerance in seconds.
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 300;

/// How the login principal is pulled out of a validated assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrincipalStrategy {
    /// The subject NameID value (default).
    SubjectNameId,
    /// A named assertion attribute.
    Attribute(String),
    /// An assertion attribute matched by its friendly name.
    FriendlyAttribute(String),
}

impl Default for PrincipalStrategy {
    fn default() -> Self {
        Self::SubjectNameId
    }
}

/// Configuration for one SAML identity provider.
#[derive(Debug, Clone)]
pub struct SamlProviderConfig {
    /// Alias identifying this provider in broker-scoped ids.
    pub provider_alias: String,
    /// Our own SP entity id, checked against audience restrictions.
    pub entity_id: String,
    /// The IdP entity id; response/assertion issuers must match when
    /// set.
    pub idp_entity_id: Option<String>,
    /// Callback (ACS) URL the IdP must address responses to.
    pub expected_destination: Option<String>,
    pub validate_destination: bool,
    pub validate_signature: bool,
    /// Require a signature on each assertion that the document
    /// signature does not already cover.
    pub want_assertions_signed: bool,
    /// Reject plaintext assertions.
    pub want_assertions_encrypted: bool,
    pub clock_skew_secs: i64,
    pub principal_strategy: PrincipalStrategy,
    /// Static IdP signing certificates (PEM or bare base64 DER).
    pub idp_certificates: Vec<String>,
    /// IdP metadata descriptor URL; fetched signing certificates are
    /// merged with the static ones.
    pub metadata_url: Option<String>,
}

impl SamlProviderConfig {
    #[must_use]
    pub fn new(provider_alias: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            provider_alias: provider_alias.into(),
            entity_id: entity_id.into(),
            idp_entity_id: None,
            expected_destination: None,
            validate_destination: true,
            validate_signature: true,
            want_assertions_signed: false,
            want_assertions_encrypted: false,
            clock_skew_secs: DEFAULT_CLOCK_SKEW_SECS,
            principal_strategy: PrincipalStrategy::default(),
            idp_certificates: Vec::new(),
            metadata_url: None,
        }
    }

    #[must_use]
    pub fn idp_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.idp_entity_id = Some(entity_id.into());
        self
    }

    #[must_use]
    pub fn expected_destination(mut self, url: impl Into<String>) -> Self {
        self.expected_destination = Some(url.into());
        self
    }

    #[must_use]
    pub fn skip_destination_validation(mut self) -> Self {
        self.validate_destination = false;
        self
    }

    #[must_use]
    pub fn skip_signature_validation(mut self) -> Self {
        self.validate_signature = false;
        self
    }

    #[must_use]
    pub fn want_assertions_signed(mut self) -> Self {
        self.want_assertions_signed = true;
        self
    }

    #[must_use]
    pub fn want_assertions_encrypted(mut self) -> Self {
        self.want_assertions_encrypted = true;
        self
    }

    #[must_use]
    pub fn clock_skew(mut self, secs: i64) -> Self {
        self.clock_skew_secs = secs;
        self
    }

    #[must_use]
    pub fn principal_strategy(mut self, strategy: PrincipalStrategy) -> Self {
        self.principal_strategy = strategy;
        self
    }

    #[must_use]
    pub fn idp_certificate(mut self, pem: impl Into<String>) -> Self {
        self.idp_certificates.push(pem.into());
        self
    }

    #[must_use]
    pub fn metadata_url(mut self, url: impl Into<String>) -> Self {
        self.metadata_url = Some(url.into());
        self
    }
}
