//! Error types for OIDC token verification.

use std::fmt;

use thiserror::Error;

/// Failures of the OIDC verification pipeline.
///
/// All variants are terminal to the current authentication attempt;
/// nothing is retried here. Operators diagnose key-rotation problems
/// from the logged kid/algorithm, so messages never carry decrypted
/// material.
#[derive(Debug, Clone, Error)]
pub enum OidcError {
    /// Compact token is neither a JWS (3 segments) nor a JWE (5).
    #[error("Malformed token: {0}")]
    TokenFormat(String),

    /// JWE decryption failed: no usable key or bad ciphertext.
    #[error("Token decryption failed: {0}")]
    Decryption(String),

    /// JWE encryption failed (issuing side / round-trip support).
    #[error("Token encryption failed: {0}")]
    Encryption(String),

    /// JWS signature could not be verified.
    #[error("Signature verification failed: {0}")]
    Signature(String),

    /// Claims were readable but failed validation.
    #[error("Claim validation failed: {0}")]
    ClaimValidation(ClaimValidationKind),

    /// JWKS endpoint unreachable or returned garbage.
    #[error("JWKS fetch failed: {0}")]
    JwksFetch(String),

    /// User-info endpoint unreachable or returned garbage.
    #[error("User-info fetch failed: {0}")]
    UserInfoFetch(String),

    /// Configured key material could not be parsed.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Key or user store failure.
    #[error(transparent)]
    Store(#[from] idbridge_core::CoreError),
}

/// Which claim check rejected the token.
///
/// Checks run in this order: expiry, audience, issued-for, issuer.
/// The ordering is part of the contract so the most common failure
/// (expiry) is always the one reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimValidationKind {
    Expired,
    Audience,
    IssuedFor,
    Issuer,
    MissingSubject,
}

impl fmt::Display for ClaimValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Expired => "token is expired",
            Self::Audience => "audience does not contain the client id",
            Self::IssuedFor => "azp does not match the client id",
            Self::Issuer => "issuer is not trusted",
            Self::MissingSubject => "subject claim is missing",
        };
        f.write_str(s)
    }
}

impl OidcError {
    /// Whether this error is the expired-token case.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::ClaimValidation(ClaimValidationKind::Expired))
    }
}

/// Result alias for OIDC operations.
pub type OidcResult<T> = Result<T, OidcError>;
