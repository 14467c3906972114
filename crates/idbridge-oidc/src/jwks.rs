//! JWKS (JSON Web Key Set) models.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use serde::{Deserialize, Serialize};

use crate::error::{OidcError, OidcResult};

/// A fetched key set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Find a key by its key ID.
    #[must_use]
    pub fn find_key(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }

    /// Find a key usable for signature verification.
    ///
    /// With a `kid` the match is exact and the key's declared use must
    /// still permit signing. Without one, the first signing-capable
    /// key wins.
    #[must_use]
    pub fn find_signing_key(&self, kid: Option<&str>) -> Option<&Jwk> {
        match kid {
            Some(kid) => self.find_key(kid).filter(|k| k.is_signing_key()),
            None => self.keys.iter().find(|k| k.is_signing_key()),
        }
    }
}

/// A single JSON Web Key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, `RSA` or `EC`.
    pub kty: String,

    #[serde(rename = "use")]
    pub use_: Option<String>,

    pub kid: Option<String>,

    pub alg: Option<String>,

    /// RSA modulus, base64url.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent, base64url.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// EC curve name, e.g. `P-256`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate, base64url.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate, base64url.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    /// X.509 certificate chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x5c: Option<Vec<String>>,
}

impl Jwk {
    /// Whether the declared use permits signature verification.
    /// Keys published with `use=enc` must never verify signatures.
    #[must_use]
    pub fn is_signing_key(&self) -> bool {
        self.use_.is_none() || self.use_.as_deref() == Some("sig")
    }

    /// Whether a JOSE header algorithm belongs to this key's family:
    /// EC keys verify ECDSA (`ES*`), RSA keys verify RSASSA
    /// (`RS*`/`PS*`).
    #[must_use]
    pub fn matches_algorithm_family(&self, header_alg: &str) -> bool {
        match self.kty.as_str() {
            "RSA" => header_alg.starts_with("RS") || header_alg.starts_with("PS"),
            "EC" => header_alg.starts_with("ES"),
            _ => false,
        }
    }

    /// Convert to a PEM-encoded SPKI public key.
    pub fn to_pem(&self) -> OidcResult<Vec<u8>> {
        match self.kty.as_str() {
            "RSA" => self.rsa_to_pem(),
            "EC" => self.ec_to_pem(),
            other => Err(OidcError::InvalidKey(format!("unsupported kty {other}"))),
        }
    }

    fn rsa_to_pem(&self) -> OidcResult<Vec<u8>> {
        let n = self.decode_component(self.n.as_deref(), "n")?;
        let e = self.decode_component(self.e.as_deref(), "e")?;

        let build = || -> Result<Vec<u8>, openssl::error::ErrorStack> {
            let n = BigNum::from_slice(&n)?;
            let e = BigNum::from_slice(&e)?;
            let rsa = Rsa::from_public_components(n, e)?;
            PKey::from_rsa(rsa)?.public_key_to_pem()
        };
        build().map_err(|e| OidcError::InvalidKey(format!("bad RSA components: {e}")))
    }

    fn ec_to_pem(&self) -> OidcResult<Vec<u8>> {
        let crv = self
            .crv
            .as_deref()
            .ok_or_else(|| OidcError::InvalidKey("EC key without crv".to_string()))?;
        let nid = curve_nid(crv)?;
        let x = self.decode_component(self.x.as_deref(), "x")?;
        let y = self.decode_component(self.y.as_deref(), "y")?;

        let build = || -> Result<Vec<u8>, openssl::error::ErrorStack> {
            let group = EcGroup::from_curve_name(nid)?;
            let x = BigNum::from_slice(&x)?;
            let y = BigNum::from_slice(&y)?;
            let key = EcKey::from_public_key_affine_coordinates(&group, &x, &y)?;
            PKey::from_ec_key(key)?.public_key_to_pem()
        };
        build().map_err(|e| OidcError::InvalidKey(format!("bad EC components: {e}")))
    }

    fn decode_component(&self, value: Option<&str>, name: &str) -> OidcResult<Vec<u8>> {
        let value = value.ok_or_else(|| {
            OidcError::InvalidKey(format!("{} key is missing component {name}", self.kty))
        })?;
        URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|e| OidcError::InvalidKey(format!("component {name} is not base64url: {e}")))
    }
}

/// Map a JOSE curve name to an openssl NID.
pub(crate) fn curve_nid(crv: &str) -> OidcResult<Nid> {
    match crv {
        "P-256" => Ok(Nid::X9_62_PRIME256V1),
        "P-384" => Ok(Nid::SECP384R1),
        "P-521" => Ok(Nid::SECP521R1),
        other => Err(OidcError::InvalidKey(format!("unsupported curve {other}"))),
    }
}
