//! SAML-specific error types.

use thiserror::Error;

/// Result type for SAML operations.
pub type SamlResult<T> = Result<T, SamlError>;

/// Failures of the SAML response/logout pipeline.
///
/// All variants terminate the current exchange. Messages never carry
/// decrypted assertion content; operators get the key id and algorithm
/// through the logs instead.
#[derive(Debug, Clone, Error)]
pub enum SamlError {
    /// Payload did not parse into a SAML document.
    #[error("Invalid SAML document: {0}")]
    InvalidDocument(String),

    /// A signed, unencrypted document arrived without a Destination.
    #[error("Signed document is missing the Destination attribute")]
    MissingDestination,

    /// Destination does not match the expected callback URL.
    #[error("Destination mismatch: expected {expected}, got {actual}")]
    InvalidDestination { expected: String, actual: String },

    /// Document or assertion signature failed to verify.
    #[error("Signature validation failed: {0}")]
    InvalidSignature(String),

    /// No principal could be extracted with the configured strategy.
    #[error("No principal in assertion: {0}")]
    MissingPrincipal(String),

    /// InResponseTo missing or not matching the outstanding request.
    #[error("Response correlation failed: {0}")]
    ReplayOrCorrelation(String),

    /// Conditions window (NotBefore/NotOnOrAfter) or audience failed.
    #[error("Assertion conditions rejected: {0}")]
    ConditionsExpired(String),

    /// Policy requires encrypted assertions but a plaintext one arrived.
    #[error("Assertion encryption required but response carries plaintext")]
    EncryptionRequired,

    /// XML-Enc decryption failed: no usable key or bad ciphertext.
    #[error("Assertion decryption failed: {0}")]
    DecryptionFailed(String),

    /// IdP returned a non-success status.
    #[error("IdP rejected the authentication: {status}")]
    RejectedStatus {
        status: String,
        /// Whether the caller may restart the login (IdP session expiry).
        retryable: bool,
    },

    /// Encoded payload exceeds the binding's size limit.
    #[error("Payload exceeds maximum size ({size} > {limit} bytes)")]
    PayloadTooLarge { size: usize, limit: usize },

    /// IssueInstant outside the freshness window.
    #[error("Stale message: {0}")]
    StaleMessage(String),

    /// Metadata endpoint unreachable or returned garbage.
    #[error("Metadata fetch failed: {0}")]
    MetadataFetch(String),

    /// Key or user store failure.
    #[error(transparent)]
    Store(#[from] idbridge_core::CoreError),
}

impl SamlError {
    /// Whether the failure permits restarting the login flow.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RejectedStatus { retryable: true, .. })
    }
}
