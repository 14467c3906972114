//! Compact JOSE token structure handling.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

use crate::error::{OidcError, OidcResult};

/// Structural type of a compact-serialized token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStructure {
    /// Signed token, three segments.
    Jws,
    /// Encrypted token, five segments.
    Jwe,
}

/// Decide whether a compact token is a JWS or a JWE by segment count.
pub fn token_structure(token: &str) -> OidcResult<TokenStructure> {
    match token.split('.').count() {
        3 => Ok(TokenStructure::Jws),
        5 => Ok(TokenStructure::Jwe),
        n => Err(OidcError::TokenFormat(format!(
            "expected 3 (JWS) or 5 (JWE) segments, found {n}"
        ))),
    }
}

/// Quick structural check for a JWS: three non-empty dot-separated
/// segments. Used to decide whether a decrypted JWE payload is nested.
#[must_use]
pub fn is_jws(candidate: &str) -> bool {
    let segments: Vec<&str> = candidate.split('.').collect();
    segments.len() == 3 && segments.iter().all(|s| !s.is_empty())
}

/// The JOSE header fields this pipeline cares about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoseHeader {
    pub alg: Option<String>,
    pub enc: Option<String>,
    pub kid: Option<String>,
    pub cty: Option<String>,
    /// Ephemeral public key for ECDH key agreement.
    pub epk: Option<EphemeralKey>,
    /// Agreement PartyUInfo, base64url.
    pub apu: Option<String>,
    /// Agreement PartyVInfo, base64url.
    pub apv: Option<String>,
}

/// JWK-shaped ephemeral EC public key from a JWE header.
#[derive(Debug, Clone, Deserialize)]
pub struct EphemeralKey {
    pub kty: String,
    pub crv: Option<String>,
    pub x: Option<String>,
    pub y: Option<String>,
}

/// Decode the protected header of a compact token without validating
/// anything else.
pub fn decode_header(token: &str) -> OidcResult<JoseHeader> {
    let first = token
        .split('.')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| OidcError::TokenFormat("empty protected header".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(first)
        .map_err(|e| OidcError::TokenFormat(format!("header is not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| OidcError::TokenFormat(format!("header is not valid JSON: {e}")))
}

/// Base64url-decode one token segment.
pub fn decode_segment(segment: &str) -> OidcResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| OidcError::TokenFormat(format!("segment is not base64url: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_by_segment_count() {
        assert_eq!(token_structure("a.b.c").unwrap(), TokenStructure::Jws);
        assert_eq!(token_structure("a.b.c.d.e").unwrap(), TokenStructure::Jwe);
        assert!(matches!(
            token_structure("a.b"),
            Err(OidcError::TokenFormat(_))
        ));
        assert!(matches!(
            token_structure("a.b.c.d"),
            Err(OidcError::TokenFormat(_))
        ));
    }

    #[test]
    fn test_is_jws_requires_three_nonempty_segments() {
        assert!(is_jws("eyJh.eyJz.c2ln"));
        assert!(!is_jws("eyJh..c2ln"));
        assert!(!is_jws("{\"sub\":\"raw json\"}"));
        assert!(!is_jws("a.b.c.d.e"));
    }

    #[test]
    fn test_decode_header_reads_kid_alg_enc() {
        // {"alg":"ECDH-ES+A256KW","enc":"A256CBC-HS512","kid":"enc-1"}
        let header = URL_SAFE_NO_PAD.encode(
            r#"{"alg":"ECDH-ES+A256KW","enc":"A256CBC-HS512","kid":"enc-1"}"#,
        );
        let token = format!("{header}.k.i.c.t");

        let parsed = decode_header(&token).unwrap();
        assert_eq!(parsed.alg.as_deref(), Some("ECDH-ES+A256KW"));
        assert_eq!(parsed.enc.as_deref(), Some("A256CBC-HS512"));
        assert_eq!(parsed.kid.as_deref(), Some("enc-1"));
    }

    #[test]
    fn test_decode_header_rejects_garbage() {
        assert!(matches!(
            decode_header("!!!.x.y"),
            Err(OidcError::TokenFormat(_))
        ));
    }
}
