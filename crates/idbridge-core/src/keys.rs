//! Realm key model.
//!
//! Keys are supplied by a [`crate::store::KeyStore`] and are read-only
//! to the verification pipeline.

use serde::{Deserialize, Serialize};

/// Intended use of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUse {
    /// Signature verification / signing.
    Sig,
    /// Encryption / decryption.
    Enc,
}

/// Lifecycle status of a key.
///
/// Only `Active` keys participate in decryption-key selection; `Passive`
/// keys may still verify signatures of older tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Passive,
    Disabled,
}

/// A signing or encryption key as stored by the realm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyEntry {
    /// Key identifier (JOSE `kid`).
    pub kid: String,
    /// JOSE algorithm name, e.g. `RS256` or `ECDH-ES+A256KW`.
    pub algorithm: String,
    pub key_use: KeyUse,
    pub status: KeyStatus,
    /// PEM-encoded public key (SPKI).
    pub public_pem: Option<String>,
    /// PEM-encoded private key. Absent for verify-only keys.
    pub private_pem: Option<String>,
    /// PEM-encoded X.509 certificate, when one was configured.
    pub certificate_pem: Option<String>,
}

impl KeyEntry {
    /// Build a public signing key entry.
    #[must_use]
    pub fn signing(kid: impl Into<String>, algorithm: impl Into<String>, public_pem: impl Into<String>) -> Self {
        Self {
            kid: kid.into(),
            algorithm: algorithm.into(),
            key_use: KeyUse::Sig,
            status: KeyStatus::Active,
            public_pem: Some(public_pem.into()),
            private_pem: None,
            certificate_pem: None,
        }
    }

    /// Build an encryption key entry with private material.
    #[must_use]
    pub fn encryption(
        kid: impl Into<String>,
        algorithm: impl Into<String>,
        public_pem: impl Into<String>,
        private_pem: impl Into<String>,
    ) -> Self {
        Self {
            kid: kid.into(),
            algorithm: algorithm.into(),
            key_use: KeyUse::Enc,
            status: KeyStatus::Active,
            public_pem: Some(public_pem.into()),
            private_pem: Some(private_pem.into()),
            certificate_pem: None,
        }
    }

    /// Attach a certificate to the entry.
    #[must_use]
    pub fn with_certificate(mut self, pem: impl Into<String>) -> Self {
        self.certificate_pem = Some(pem.into());
        self
    }

    /// Mark the entry passive or disabled.
    #[must_use]
    pub fn with_status(mut self, status: KeyStatus) -> Self {
        self.status = status;
        self
    }

    /// Whether the key can decrypt (has private material).
    #[must_use]
    pub fn can_decrypt(&self) -> bool {
        self.private_pem.is_some()
    }
}
