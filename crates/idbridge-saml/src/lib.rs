//! SAML 2.0 relying-party processing.
//!
//! Decodes POST and Redirect binding payloads, validates XML-DSig
//! signatures and assertion conditions, decrypts XML-Enc assertions
//! with realm keys, and extracts an [`idbridge_core::IdentityDraft`]
//! for resolution. Logout messages terminate broker sessions
//! idempotently.

pub mod bindings;
pub mod config;
pub mod crypto;
pub mod document;
pub mod error;
pub mod metadata;
pub mod processor;
pub mod sessions;
pub mod signature;
#[cfg(test)]
pub(crate) mod testutil;

pub use bindings::{
    decode_payload, encode_post, encode_redirect, Binding, MAX_ENCODED_SIZE_POST,
    MAX_ENCODED_SIZE_REDIRECT,
};
pub use config::{PrincipalStrategy, SamlProviderConfig, DEFAULT_CLOCK_SKEW_SECS};
pub use crypto::{decrypt_element, encrypt_element};
pub use document::{
    parse_document, Assertion, DocumentKind, LogoutRequestDocument, NameId, ResponseDocument,
    SamlAttribute, SamlDocumentHolder, StatusDocument, STATUS_AUTHN_FAILED, STATUS_SUCCESS,
};
pub use error::{SamlError, SamlResult};
pub use metadata::{parse_descriptor, IdpDescriptor, MetadataCache, DEFAULT_METADATA_CACHE_TTL};
pub use processor::{verify_saml_response, ProcessedMessage, RedirectParams, SamlProcessor};
pub use sessions::{BrokerSession, SessionRegistry, SessionState};
pub use signature::{verify_enveloped, verify_redirect_signature};
