//! XML-Enc handling for `EncryptedAssertion` and `EncryptedID`.
//!
//! Key transport is RSA (OAEP or PKCS#1 v1.5), content encryption
//! AES-CBC or AES-GCM. The decryption key is selected from the realm
//! key store by the key-transport algorithm; failures log the key id
//! and algorithm, never key or plaintext material.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use openssl::pkey::PKey;
use openssl::rsa::Padding;
use openssl::symm::{decrypt_aead, encrypt_aead, Cipher, Crypter, Mode};
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, warn};

use idbridge_core::{KeyEntry, KeyStore, KeyUse};

use crate::error::{SamlError, SamlResult};

const XMLENC_RSA_OAEP: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p";
const XMLENC_RSA_1_5: &str = "http://www.w3.org/2001/04/xmlenc#rsa-1_5";
const XMLENC_AES128_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes128-cbc";
const XMLENC_AES256_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes256-cbc";
const XMLENC_AES128_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes128-gcm";
const XMLENC_AES256_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes256-gcm";

const GCM_IV_LEN: usize = 12;
const GCM_TAG_LEN: usize = 16;
const CBC_IV_LEN: usize = 16;

/// Decrypt an `EncryptedAssertion`/`EncryptedID` subtree to plaintext
/// XML, selecting a realm key by the key-transport algorithm.
pub async fn decrypt_element(xml: &str, key_store: &Arc<dyn KeyStore>) -> SamlResult<String> {
    let parts = parse_encrypted_data(xml)?;

    let key = select_key(key_store, &parts.key_algorithm).await?;
    debug!(kid = %key.kid, algorithm = %parts.key_algorithm, "decrypting SAML element");

    let private_pem = key.private_pem.as_deref().ok_or_else(|| {
        warn!(kid = %key.kid, algorithm = %key.algorithm, "encryption key has no private material");
        SamlError::DecryptionFailed(format!("key {} has no private material", key.kid))
    })?;

    let cek = decrypt_key_transport(&parts, private_pem)?;
    let plaintext = decrypt_content(&parts, &cek)?;
    String::from_utf8(plaintext)
        .map_err(|_| SamlError::DecryptionFailed("plaintext is not UTF-8".to_string()))
}

/// Encrypt plaintext XML into an `EncryptedData` subtree addressed to
/// `public_pem`. Round-trip counterpart for issuing and tests.
pub fn encrypt_element(
    plaintext: &str,
    public_pem: &str,
    key_algorithm: &str,
    content_algorithm: &str,
) -> SamlResult<String> {
    let (cipher, key_len) = content_cipher(content_algorithm)?;

    let mut cek = vec![0u8; key_len];
    openssl::rand::rand_bytes(&mut cek)
        .map_err(|e| SamlError::DecryptionFailed(format!("rng failure: {e}")))?;

    let encrypted_key = encrypt_key_transport(&cek, public_pem, key_algorithm)?;
    let payload = encrypt_content(plaintext.as_bytes(), &cek, cipher, content_algorithm)?;

    Ok(format!(
        concat!(
            "<xenc:EncryptedData xmlns:xenc=\"http://www.w3.org/2001/04/xmlenc#\">",
            "<xenc:EncryptionMethod Algorithm=\"{content_alg}\"/>",
            "<ds:KeyInfo xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">",
            "<xenc:EncryptedKey>",
            "<xenc:EncryptionMethod Algorithm=\"{key_alg}\"/>",
            "<xenc:CipherData><xenc:CipherValue>{ek}</xenc:CipherValue></xenc:CipherData>",
            "</xenc:EncryptedKey>",
            "</ds:KeyInfo>",
            "<xenc:CipherData><xenc:CipherValue>{ct}</xenc:CipherValue></xenc:CipherData>",
            "</xenc:EncryptedData>"
        ),
        content_alg = content_algorithm,
        key_alg = key_algorithm,
        ek = STANDARD.encode(&encrypted_key),
        ct = STANDARD.encode(&payload),
    ))
}

struct EncryptedParts {
    content_algorithm: String,
    key_algorithm: String,
    encrypted_key: Vec<u8>,
    ciphertext: Vec<u8>,
}

fn parse_encrypted_data(xml: &str) -> SamlResult<EncryptedParts> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut in_encrypted_key = false;
    let mut in_cipher_value = false;
    let mut content_algorithm = None;
    let mut key_algorithm = None;
    let mut key_cipher_b64 = String::new();
    let mut content_cipher_b64 = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e) | Event::Empty(e)) => {
                let local = e.local_name();
                match local.as_ref() {
                    b"EncryptedKey" => in_encrypted_key = true,
                    b"EncryptionMethod" => {
                        let alg = e.attributes().flatten().find_map(|a| {
                            (a.key.as_ref() == b"Algorithm")
                                .then(|| a.unescape_value().unwrap_or_default().to_string())
                        });
                        if in_encrypted_key {
                            key_algorithm = key_algorithm.or(alg);
                        } else {
                            content_algorithm = content_algorithm.or(alg);
                        }
                    }
                    b"CipherValue" => in_cipher_value = true,
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if in_cipher_value {
                    let text = e.unescape().unwrap_or_default();
                    if in_encrypted_key {
                        key_cipher_b64.push_str(&text);
                    } else {
                        content_cipher_b64.push_str(&text);
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"EncryptedKey" => in_encrypted_key = false,
                b"CipherValue" => in_cipher_value = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SamlError::DecryptionFailed(format!("XML parse error: {e}")))
            }
            _ => {}
        }
    }

    let decode = |label: &str, b64: &str| -> SamlResult<Vec<u8>> {
        STANDARD
            .decode(b64.replace(['\n', '\r', ' '], ""))
            .map_err(|e| SamlError::DecryptionFailed(format!("bad {label} encoding: {e}")))
    };

    Ok(EncryptedParts {
        content_algorithm: content_algorithm
            .ok_or_else(|| SamlError::DecryptionFailed("no content algorithm".to_string()))?,
        key_algorithm: key_algorithm
            .ok_or_else(|| SamlError::DecryptionFailed("no key-transport algorithm".to_string()))?,
        encrypted_key: decode("EncryptedKey", &key_cipher_b64)?,
        ciphertext: decode("CipherValue", &content_cipher_b64)?,
    })
}

/// Realm key by transport algorithm; falls back to any ACTIVE ENC key.
async fn select_key(
    key_store: &Arc<dyn KeyStore>,
    key_algorithm: &str,
) -> SamlResult<KeyEntry> {
    let name = match key_algorithm {
        XMLENC_RSA_OAEP => "RSA-OAEP",
        XMLENC_RSA_1_5 => "RSA1_5",
        other => {
            return Err(SamlError::DecryptionFailed(format!(
                "unsupported key-transport algorithm {other}"
            )))
        }
    };

    if let Some(key) = key_store.find_key(None, KeyUse::Enc, Some(name)).await? {
        return Ok(key);
    }
    let fallback = key_store
        .active_keys(KeyUse::Enc)
        .await?
        .into_iter()
        .find(KeyEntry::can_decrypt);
    fallback.ok_or_else(|| {
        warn!(algorithm = %name, "no active encryption key for assertion");
        SamlError::DecryptionFailed("no matching encryption key".to_string())
    })
}

fn decrypt_key_transport(parts: &EncryptedParts, private_pem: &str) -> SamlResult<Vec<u8>> {
    let padding = match parts.key_algorithm.as_str() {
        XMLENC_RSA_OAEP => Padding::PKCS1_OAEP,
        XMLENC_RSA_1_5 => Padding::PKCS1,
        other => {
            return Err(SamlError::DecryptionFailed(format!(
                "unsupported key-transport algorithm {other}"
            )))
        }
    };

    let pkey = PKey::private_key_from_pem(private_pem.as_bytes())
        .map_err(|e| SamlError::DecryptionFailed(format!("bad private key: {e}")))?;
    let rsa = pkey
        .rsa()
        .map_err(|e| SamlError::DecryptionFailed(format!("key is not RSA: {e}")))?;

    let mut buf = vec![0u8; rsa.size() as usize];
    let len = rsa
        .private_decrypt(&parts.encrypted_key, &mut buf, padding)
        .map_err(|e| SamlError::DecryptionFailed(format!("key transport failed: {e}")))?;
    buf.truncate(len);
    Ok(buf)
}

fn encrypt_key_transport(cek: &[u8], public_pem: &str, key_algorithm: &str) -> SamlResult<Vec<u8>> {
    let padding = match key_algorithm {
        XMLENC_RSA_OAEP => Padding::PKCS1_OAEP,
        XMLENC_RSA_1_5 => Padding::PKCS1,
        other => {
            return Err(SamlError::DecryptionFailed(format!(
                "unsupported key-transport algorithm {other}"
            )))
        }
    };

    let pkey = PKey::public_key_from_pem(public_pem.as_bytes())
        .map_err(|e| SamlError::DecryptionFailed(format!("bad public key: {e}")))?;
    let rsa = pkey
        .rsa()
        .map_err(|e| SamlError::DecryptionFailed(format!("key is not RSA: {e}")))?;

    let mut buf = vec![0u8; rsa.size() as usize];
    let len = rsa
        .public_encrypt(cek, &mut buf, padding)
        .map_err(|e| SamlError::DecryptionFailed(format!("key transport failed: {e}")))?;
    buf.truncate(len);
    Ok(buf)
}

fn content_cipher(algorithm: &str) -> SamlResult<(Cipher, usize)> {
    match algorithm {
        XMLENC_AES128_CBC => Ok((Cipher::aes_128_cbc(), 16)),
        XMLENC_AES256_CBC => Ok((Cipher::aes_256_cbc(), 32)),
        XMLENC_AES128_GCM => Ok((Cipher::aes_128_gcm(), 16)),
        XMLENC_AES256_GCM => Ok((Cipher::aes_256_gcm(), 32)),
        other => Err(SamlError::DecryptionFailed(format!(
            "unsupported content algorithm {other}"
        ))),
    }
}

fn is_gcm(algorithm: &str) -> bool {
    matches!(algorithm, XMLENC_AES128_GCM | XMLENC_AES256_GCM)
}

fn decrypt_content(parts: &EncryptedParts, cek: &[u8]) -> SamlResult<Vec<u8>> {
    let (cipher, key_len) = content_cipher(&parts.content_algorithm)?;
    if cek.len() != key_len {
        return Err(SamlError::DecryptionFailed(format!(
            "content key length {} does not fit the declared algorithm",
            cek.len()
        )));
    }

    let data = &parts.ciphertext;
    if is_gcm(&parts.content_algorithm) {
        if data.len() < GCM_IV_LEN + GCM_TAG_LEN {
            return Err(SamlError::DecryptionFailed("truncated ciphertext".to_string()));
        }
        let iv = &data[..GCM_IV_LEN];
        let tag = &data[data.len() - GCM_TAG_LEN..];
        let ct = &data[GCM_IV_LEN..data.len() - GCM_TAG_LEN];
        decrypt_aead(cipher, cek, Some(iv), &[], ct, tag)
            .map_err(|_| SamlError::DecryptionFailed("authenticated decryption failed".to_string()))
    } else {
        if data.len() < CBC_IV_LEN || (data.len() - CBC_IV_LEN) % 16 != 0 {
            return Err(SamlError::DecryptionFailed("truncated ciphertext".to_string()));
        }
        let iv = &data[..CBC_IV_LEN];
        let ct = &data[CBC_IV_LEN..];

        // XML-Enc CBC padding: last byte is the pad length, the other
        // pad bytes are arbitrary, so PKCS#7 unpadding cannot be used.
        let mut crypter = Crypter::new(cipher, Mode::Decrypt, cek, Some(iv))
            .map_err(|e| SamlError::DecryptionFailed(format!("cipher setup failed: {e}")))?;
        crypter.pad(false);
        let mut plain = vec![0u8; ct.len() + cipher.block_size()];
        let mut count = crypter
            .update(ct, &mut plain)
            .map_err(|e| SamlError::DecryptionFailed(format!("decryption failed: {e}")))?;
        count += crypter
            .finalize(&mut plain[count..])
            .map_err(|e| SamlError::DecryptionFailed(format!("decryption failed: {e}")))?;
        plain.truncate(count);

        let pad_len = *plain
            .last()
            .ok_or_else(|| SamlError::DecryptionFailed("empty plaintext".to_string()))?
            as usize;
        if pad_len == 0 || pad_len > plain.len() {
            return Err(SamlError::DecryptionFailed("bad padding".to_string()));
        }
        plain.truncate(plain.len() - pad_len);
        Ok(plain)
    }
}

fn encrypt_content(
    plaintext: &[u8],
    cek: &[u8],
    cipher: Cipher,
    algorithm: &str,
) -> SamlResult<Vec<u8>> {
    if is_gcm(algorithm) {
        let mut iv = vec![0u8; GCM_IV_LEN];
        openssl::rand::rand_bytes(&mut iv)
            .map_err(|e| SamlError::DecryptionFailed(format!("rng failure: {e}")))?;
        let mut tag = vec![0u8; GCM_TAG_LEN];
        let ct = encrypt_aead(cipher, cek, Some(&iv), &[], plaintext, &mut tag)
            .map_err(|e| SamlError::DecryptionFailed(format!("encryption failed: {e}")))?;
        let mut out = iv;
        out.extend_from_slice(&ct);
        out.extend_from_slice(&tag);
        Ok(out)
    } else {
        let block = cipher.block_size();
        let pad_len = block - (plaintext.len() % block);
        let mut padded = plaintext.to_vec();
        padded.resize(plaintext.len() + pad_len, pad_len as u8);

        let mut iv = vec![0u8; CBC_IV_LEN];
        openssl::rand::rand_bytes(&mut iv)
            .map_err(|e| SamlError::DecryptionFailed(format!("rng failure: {e}")))?;

        let mut crypter = Crypter::new(cipher, Mode::Encrypt, cek, Some(&iv))
            .map_err(|e| SamlError::DecryptionFailed(format!("cipher setup failed: {e}")))?;
        crypter.pad(false);
        let mut ct = vec![0u8; padded.len() + block];
        let mut count = crypter
            .update(&padded, &mut ct)
            .map_err(|e| SamlError::DecryptionFailed(format!("encryption failed: {e}")))?;
        count += crypter
            .finalize(&mut ct[count..])
            .map_err(|e| SamlError::DecryptionFailed(format!("encryption failed: {e}")))?;
        ct.truncate(count);

        let mut out = iv;
        out.extend_from_slice(&ct);
        Ok(out)
    }
}
