//! OIDC relying-party verification.
//!
//! Takes a provider token response through the JOSE pipeline (JWE
//! decryption against realm keys, JWS verification against JWKS or
//! static keys, ordered claim validation), fetches the user-info
//! profile when configured, and produces an
//! [`idbridge_core::IdentityDraft`] for resolution.

pub mod claims;
pub mod config;
pub mod decoder;
pub mod error;
pub mod extract;
pub mod jose;
pub mod jwe;
pub mod jwks;
pub mod jwks_cache;
pub mod userinfo;
pub mod verify;

pub use claims::ValidatedClaimSet;
pub use config::{OidcProviderConfig, DEFAULT_CLOCK_SKEW_SECS};
pub use decoder::JoseDecoder;
pub use error::{ClaimValidationKind, OidcError, OidcResult};
pub use extract::{broker_session_id, broker_user_id, extract_identity};
pub use jose::{is_jws, token_structure, TokenStructure};
pub use jwks::{Jwk, JwkSet};
pub use jwks_cache::{JwksCache, DEFAULT_JWKS_CACHE_TTL};
pub use verify::{verify_oidc_response, OidcVerifier, TokenResponse};
