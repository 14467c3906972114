//! JWE compact-serialization encryption and decryption.
//!
//! Built directly on openssl primitives: ECDH-ES (direct and +A256KW)
//! and RSA-OAEP key management, AES-CBC-HMAC and AES-GCM content
//! encryption. The encrypt side exists for token-issuing callers and
//! for round-trip coverage; the broker itself only decrypts.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use openssl::aes::{unwrap_key, wrap_key, AesKey};
use openssl::bn::{BigNum, BigNumContext};
use openssl::derive::Deriver;
use openssl::ec::{EcGroup, EcKey};
use openssl::encrypt::{Decrypter, Encrypter};
use openssl::hash::MessageDigest;
use openssl::memcmp;
use openssl::nid::Nid;
use openssl::pkey::{HasPrivate, PKey, PKeyRef, Public};
use openssl::rand::rand_bytes;
use openssl::rsa::Padding;
use openssl::sign::Signer;
use openssl::symm::{self, Cipher};
use serde_json::json;
use sha2::{Digest, Sha256};

use idbridge_core::KeyEntry;

use crate::error::{OidcError, OidcResult};
use crate::jose::{decode_header, decode_segment, EphemeralKey, JoseHeader};
use crate::jwks::curve_nid;

/// Supported JWE key-management algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyManagementAlg {
    EcdhEs,
    EcdhEsA256Kw,
    RsaOaep,
    RsaOaep256,
}

impl KeyManagementAlg {
    pub fn from_name(name: &str) -> OidcResult<Self> {
        match name {
            "ECDH-ES" => Ok(Self::EcdhEs),
            "ECDH-ES+A256KW" => Ok(Self::EcdhEsA256Kw),
            "RSA-OAEP" => Ok(Self::RsaOaep),
            "RSA-OAEP-256" => Ok(Self::RsaOaep256),
            other => Err(OidcError::Decryption(format!(
                "unsupported key management algorithm {other}"
            ))),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::EcdhEs => "ECDH-ES",
            Self::EcdhEsA256Kw => "ECDH-ES+A256KW",
            Self::RsaOaep => "RSA-OAEP",
            Self::RsaOaep256 => "RSA-OAEP-256",
        }
    }
}

/// Supported JWE content-encryption algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncryption {
    A128CbcHs256,
    A256CbcHs512,
    A128Gcm,
    A256Gcm,
}

impl ContentEncryption {
    pub fn from_name(name: &str) -> OidcResult<Self> {
        match name {
            "A128CBC-HS256" => Ok(Self::A128CbcHs256),
            "A256CBC-HS512" => Ok(Self::A256CbcHs512),
            "A128GCM" => Ok(Self::A128Gcm),
            "A256GCM" => Ok(Self::A256Gcm),
            other => Err(OidcError::Decryption(format!(
                "unsupported content encryption {other}"
            ))),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::A128CbcHs256 => "A128CBC-HS256",
            Self::A256CbcHs512 => "A256CBC-HS512",
            Self::A128Gcm => "A128GCM",
            Self::A256Gcm => "A256GCM",
        }
    }

    /// CEK length in bytes. CBC-HMAC keys are the MAC and AES halves
    /// concatenated.
    fn key_len(&self) -> usize {
        match self {
            Self::A128CbcHs256 => 32,
            Self::A256CbcHs512 => 64,
            Self::A128Gcm => 16,
            Self::A256Gcm => 32,
        }
    }

    fn iv_len(&self) -> usize {
        match self {
            Self::A128CbcHs256 | Self::A256CbcHs512 => 16,
            Self::A128Gcm | Self::A256Gcm => 12,
        }
    }

    fn is_gcm(&self) -> bool {
        matches!(self, Self::A128Gcm | Self::A256Gcm)
    }

    fn cipher(&self) -> Cipher {
        match self {
            Self::A128CbcHs256 => Cipher::aes_128_cbc(),
            Self::A256CbcHs512 => Cipher::aes_256_cbc(),
            Self::A128Gcm => Cipher::aes_128_gcm(),
            Self::A256Gcm => Cipher::aes_256_gcm(),
        }
    }

    fn hmac_md(&self) -> MessageDigest {
        match self {
            Self::A128CbcHs256 => MessageDigest::sha256(),
            _ => MessageDigest::sha512(),
        }
    }
}

fn dec_err(e: impl std::fmt::Display) -> OidcError {
    OidcError::Decryption(e.to_string())
}

fn enc_err(e: impl std::fmt::Display) -> OidcError {
    OidcError::Encryption(e.to_string())
}

/// Decrypt a compact JWE with the realm key, returning the plaintext
/// payload (a nested JWS or raw claims JSON).
pub fn decrypt(token: &str, key: &KeyEntry) -> OidcResult<Vec<u8>> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 5 {
        return Err(OidcError::TokenFormat(format!(
            "JWE must have 5 segments, found {}",
            parts.len()
        )));
    }

    let header = decode_header(token)?;
    let alg_name = header
        .alg
        .as_deref()
        .ok_or_else(|| OidcError::Decryption("JWE header has no alg".to_string()))?;
    let alg = KeyManagementAlg::from_name(alg_name)?;
    let enc_name = header
        .enc
        .as_deref()
        .ok_or_else(|| OidcError::Decryption("JWE header has no enc".to_string()))?;
    let enc = ContentEncryption::from_name(enc_name)?;

    let private_pem = key.private_pem.as_deref().ok_or_else(|| {
        OidcError::Decryption(format!("key {} has no private material", key.kid))
    })?;

    let encrypted_key = decode_segment(parts[1])?;
    let iv = decode_segment(parts[2])?;
    let ciphertext = decode_segment(parts[3])?;
    let tag = decode_segment(parts[4])?;

    let cek = decrypt_cek(alg, enc, &header, private_pem, &encrypted_key)?;
    decrypt_content(enc, &cek, &iv, &ciphertext, &tag, parts[0].as_bytes())
}

/// Encrypt `payload` to the holder of `key`, producing a compact JWE.
pub fn encrypt(
    payload: &[u8],
    key: &KeyEntry,
    alg: KeyManagementAlg,
    enc: ContentEncryption,
) -> OidcResult<String> {
    let public_pem = key
        .public_pem
        .as_deref()
        .ok_or_else(|| OidcError::InvalidKey(format!("key {} has no public material", key.kid)))?;
    let recipient = PKey::public_key_from_pem(public_pem.as_bytes())
        .map_err(|e| OidcError::InvalidKey(format!("bad public key: {e}")))?;

    let mut header = json!({
        "alg": alg.name(),
        "enc": enc.name(),
    });
    if !key.kid.is_empty() {
        header["kid"] = json!(key.kid);
    }

    let (cek, encrypted_key) = match alg {
        KeyManagementAlg::EcdhEs | KeyManagementAlg::EcdhEsA256Kw => {
            encrypt_cek_ecdh(alg, enc, &recipient, &mut header)?
        }
        KeyManagementAlg::RsaOaep | KeyManagementAlg::RsaOaep256 => {
            encrypt_cek_rsa(alg, enc, &recipient)?
        }
    };

    let header_b64 = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(&header).map_err(|e| enc_err(format!("header encoding: {e}")))?,
    );

    let mut iv = vec![0u8; enc.iv_len()];
    rand_bytes(&mut iv).map_err(enc_err)?;

    let (ciphertext, tag) = encrypt_content(enc, &cek, &iv, payload, header_b64.as_bytes())?;

    Ok(format!(
        "{header_b64}.{}.{}.{}.{}",
        URL_SAFE_NO_PAD.encode(&encrypted_key),
        URL_SAFE_NO_PAD.encode(&iv),
        URL_SAFE_NO_PAD.encode(&ciphertext),
        URL_SAFE_NO_PAD.encode(&tag)
    ))
}

fn decrypt_cek(
    alg: KeyManagementAlg,
    enc: ContentEncryption,
    header: &JoseHeader,
    private_pem: &str,
    encrypted_key: &[u8],
) -> OidcResult<Vec<u8>> {
    let private = PKey::private_key_from_pem(private_pem.as_bytes())
        .map_err(|e| OidcError::InvalidKey(format!("bad private key: {e}")))?;

    match alg {
        KeyManagementAlg::EcdhEs => {
            let z = ecdh_shared_secret(&private, header)?;
            Ok(concat_kdf(&z, enc.name(), header, enc.key_len()))
        }
        KeyManagementAlg::EcdhEsA256Kw => {
            let z = ecdh_shared_secret(&private, header)?;
            let kek = concat_kdf(&z, alg.name(), header, 32);
            if encrypted_key.len() < 16 {
                return Err(OidcError::Decryption("wrapped key too short".to_string()));
            }
            let unwrapper = AesKey::new_decrypt(&kek)
                .map_err(|e| OidcError::Decryption(format!("bad KEK: {e:?}")))?;
            let mut cek = vec![0u8; encrypted_key.len() - 8];
            let n = unwrap_key(&unwrapper, None, &mut cek, encrypted_key)
                .map_err(|e| OidcError::Decryption(format!("key unwrap failed: {e:?}")))?;
            cek.truncate(n);
            Ok(cek)
        }
        KeyManagementAlg::RsaOaep | KeyManagementAlg::RsaOaep256 => {
            let md = match alg {
                KeyManagementAlg::RsaOaep => MessageDigest::sha1(),
                _ => MessageDigest::sha256(),
            };
            let mut decrypter = Decrypter::new(&private).map_err(dec_err)?;
            decrypter.set_rsa_padding(Padding::PKCS1_OAEP).map_err(dec_err)?;
            decrypter.set_rsa_oaep_md(md).map_err(dec_err)?;
            decrypter.set_rsa_mgf1_md(md).map_err(dec_err)?;
            let mut cek = vec![0u8; decrypter.decrypt_len(encrypted_key).map_err(dec_err)?];
            let n = decrypter.decrypt(encrypted_key, &mut cek).map_err(dec_err)?;
            cek.truncate(n);
            Ok(cek)
        }
    }
}

fn encrypt_cek_ecdh(
    alg: KeyManagementAlg,
    enc: ContentEncryption,
    recipient: &PKeyRef<Public>,
    header: &mut serde_json::Value,
) -> OidcResult<(Vec<u8>, Vec<u8>)> {
    let recipient_ec = recipient
        .ec_key()
        .map_err(|_| OidcError::InvalidKey("ECDH requires an EC key".to_string()))?;
    let group = recipient_ec.group();

    let ephemeral = EcKey::generate(group).map_err(enc_err)?;
    header["epk"] = ephemeral_public_jwk(&ephemeral, group)?;

    let eph_pkey = PKey::from_ec_key(ephemeral).map_err(enc_err)?;
    let mut deriver = Deriver::new(&eph_pkey).map_err(enc_err)?;
    deriver.set_peer(recipient).map_err(enc_err)?;
    let z = deriver.derive_to_vec().map_err(enc_err)?;

    match alg {
        KeyManagementAlg::EcdhEs => {
            let cek = concat_kdf(&z, enc.name(), &JoseHeader::default(), enc.key_len());
            Ok((cek, Vec::new()))
        }
        _ => {
            let kek = concat_kdf(&z, alg.name(), &JoseHeader::default(), 32);
            let mut cek = vec![0u8; enc.key_len()];
            rand_bytes(&mut cek).map_err(enc_err)?;
            let wrapper = AesKey::new_encrypt(&kek)
                .map_err(|e| enc_err(format!("bad KEK: {e:?}")))?;
            let mut wrapped = vec![0u8; cek.len() + 8];
            let n = wrap_key(&wrapper, None, &mut wrapped, &cek)
                .map_err(|e| enc_err(format!("key wrap failed: {e:?}")))?;
            wrapped.truncate(n);
            Ok((cek, wrapped))
        }
    }
}

fn encrypt_cek_rsa(
    alg: KeyManagementAlg,
    enc: ContentEncryption,
    recipient: &PKeyRef<Public>,
) -> OidcResult<(Vec<u8>, Vec<u8>)> {
    let md = match alg {
        KeyManagementAlg::RsaOaep => MessageDigest::sha1(),
        _ => MessageDigest::sha256(),
    };
    let mut cek = vec![0u8; enc.key_len()];
    rand_bytes(&mut cek).map_err(enc_err)?;

    let mut encrypter = Encrypter::new(recipient).map_err(enc_err)?;
    encrypter.set_rsa_padding(Padding::PKCS1_OAEP).map_err(enc_err)?;
    encrypter.set_rsa_oaep_md(md).map_err(enc_err)?;
    encrypter.set_rsa_mgf1_md(md).map_err(enc_err)?;
    let mut out = vec![0u8; encrypter.encrypt_len(&cek).map_err(enc_err)?];
    let n = encrypter.encrypt(&cek, &mut out).map_err(enc_err)?;
    out.truncate(n);
    Ok((cek, out))
}

/// Serialize the ephemeral public key as the `epk` header member.
fn ephemeral_public_jwk(
    ephemeral: &EcKey<openssl::pkey::Private>,
    group: &openssl::ec::EcGroupRef,
) -> OidcResult<serde_json::Value> {
    let mut ctx = BigNumContext::new().map_err(enc_err)?;
    let mut x = BigNum::new().map_err(enc_err)?;
    let mut y = BigNum::new().map_err(enc_err)?;
    ephemeral
        .public_key()
        .affine_coordinates(group, &mut x, &mut y, &mut ctx)
        .map_err(enc_err)?;

    let field_len = group.degree().div_ceil(8) as i32;
    let crv = match group.curve_name() {
        Some(Nid::X9_62_PRIME256V1) => "P-256",
        Some(Nid::SECP384R1) => "P-384",
        Some(Nid::SECP521R1) => "P-521",
        _ => return Err(OidcError::InvalidKey("unsupported EC curve".to_string())),
    };

    Ok(json!({
        "kty": "EC",
        "crv": crv,
        "x": URL_SAFE_NO_PAD.encode(x.to_vec_padded(field_len).map_err(enc_err)?),
        "y": URL_SAFE_NO_PAD.encode(y.to_vec_padded(field_len).map_err(enc_err)?),
    }))
}

/// ECDH shared secret between our private key and the sender's
/// ephemeral public key from the header.
fn ecdh_shared_secret<T: HasPrivate>(
    private: &PKeyRef<T>,
    header: &JoseHeader,
) -> OidcResult<Vec<u8>> {
    let epk = header
        .epk
        .as_ref()
        .ok_or_else(|| OidcError::Decryption("ECDH header has no epk".to_string()))?;
    let peer = peer_key(epk)?;

    let mut deriver = Deriver::new(private).map_err(dec_err)?;
    deriver.set_peer(&peer).map_err(dec_err)?;
    deriver.derive_to_vec().map_err(dec_err)
}

fn peer_key(epk: &EphemeralKey) -> OidcResult<PKey<Public>> {
    if epk.kty != "EC" {
        return Err(OidcError::Decryption(format!(
            "epk kty {} is not EC",
            epk.kty
        )));
    }
    let crv = epk
        .crv
        .as_deref()
        .ok_or_else(|| OidcError::Decryption("epk has no crv".to_string()))?;
    let nid = curve_nid(crv)?;
    let x = decode_epk_coord(epk.x.as_deref(), "x")?;
    let y = decode_epk_coord(epk.y.as_deref(), "y")?;

    let build = || -> Result<PKey<Public>, openssl::error::ErrorStack> {
        let group = EcGroup::from_curve_name(nid)?;
        let x = BigNum::from_slice(&x)?;
        let y = BigNum::from_slice(&y)?;
        let ec = EcKey::from_public_key_affine_coordinates(&group, &x, &y)?;
        PKey::from_ec_key(ec)
    };
    build().map_err(dec_err)
}

fn decode_epk_coord(value: Option<&str>, name: &str) -> OidcResult<Vec<u8>> {
    let value =
        value.ok_or_else(|| OidcError::Decryption(format!("epk has no {name} coordinate")))?;
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| OidcError::Decryption(format!("epk {name} is not base64url: {e}")))
}

/// Concat KDF (NIST SP 800-56A) over SHA-256, as JOSE requires for
/// ECDH-ES. AlgorithmID is the enc name for direct agreement and the
/// alg name for key wrapping.
fn concat_kdf(z: &[u8], algorithm_id: &str, header: &JoseHeader, key_len: usize) -> Vec<u8> {
    let apu = header
        .apu
        .as_deref()
        .and_then(|v| URL_SAFE_NO_PAD.decode(v).ok())
        .unwrap_or_default();
    let apv = header
        .apv
        .as_deref()
        .and_then(|v| URL_SAFE_NO_PAD.decode(v).ok())
        .unwrap_or_default();

    let mut out = Vec::with_capacity(key_len.div_ceil(32) * 32);
    for counter in 1..=key_len.div_ceil(32) as u32 {
        let mut hasher = Sha256::new();
        hasher.update(counter.to_be_bytes());
        hasher.update(z);
        hasher.update((algorithm_id.len() as u32).to_be_bytes());
        hasher.update(algorithm_id.as_bytes());
        hasher.update((apu.len() as u32).to_be_bytes());
        hasher.update(&apu);
        hasher.update((apv.len() as u32).to_be_bytes());
        hasher.update(&apv);
        hasher.update(((key_len * 8) as u32).to_be_bytes());
        out.extend_from_slice(&hasher.finalize());
    }
    out.truncate(key_len);
    out
}

fn decrypt_content(
    enc: ContentEncryption,
    cek: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> OidcResult<Vec<u8>> {
    if cek.len() != enc.key_len() {
        return Err(OidcError::Decryption(format!(
            "CEK length {} does not fit {}",
            cek.len(),
            enc.name()
        )));
    }

    if enc.is_gcm() {
        return symm::decrypt_aead(enc.cipher(), cek, Some(iv), aad, ciphertext, tag)
            .map_err(|_| OidcError::Decryption("AEAD authentication failed".to_string()));
    }

    let (mac_key, enc_key) = cek.split_at(cek.len() / 2);
    let expected = cbc_hmac_tag(enc, mac_key, aad, iv, ciphertext).map_err(dec_err)?;
    if tag.len() != expected.len() || !memcmp::eq(&expected, tag) {
        return Err(OidcError::Decryption(
            "authentication tag mismatch".to_string(),
        ));
    }
    symm::decrypt(enc.cipher(), enc_key, Some(iv), ciphertext)
        .map_err(|_| OidcError::Decryption("CBC decryption failed".to_string()))
}

fn encrypt_content(
    enc: ContentEncryption,
    cek: &[u8],
    iv: &[u8],
    payload: &[u8],
    aad: &[u8],
) -> OidcResult<(Vec<u8>, Vec<u8>)> {
    if enc.is_gcm() {
        let mut tag = vec![0u8; 16];
        let ciphertext = symm::encrypt_aead(enc.cipher(), cek, Some(iv), aad, payload, &mut tag)
            .map_err(enc_err)?;
        return Ok((ciphertext, tag));
    }

    let (mac_key, enc_key) = cek.split_at(cek.len() / 2);
    let ciphertext = symm::encrypt(enc.cipher(), enc_key, Some(iv), payload).map_err(enc_err)?;
    let tag = cbc_hmac_tag(enc, mac_key, aad, iv, &ciphertext).map_err(enc_err)?;
    Ok((ciphertext, tag))
}

/// The CBC-HMAC tag: HMAC over AAD || IV || ciphertext || AL, where AL
/// is the AAD bit length as a 64-bit big-endian integer, truncated to
/// the MAC-key length.
fn cbc_hmac_tag(
    enc: ContentEncryption,
    mac_key: &[u8],
    aad: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, openssl::error::ErrorStack> {
    let pkey = PKey::hmac(mac_key)?;
    let mut signer = Signer::new(enc.hmac_md(), &pkey)?;
    signer.update(aad)?;
    signer.update(iv)?;
    signer.update(ciphertext)?;
    signer.update(&((aad.len() as u64) * 8).to_be_bytes())?;
    let mut full = signer.sign_to_vec()?;
    full.truncate(mac_key.len());
    Ok(full)
}
