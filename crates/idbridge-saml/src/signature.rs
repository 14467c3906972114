//! XML-DSig verification for both bindings.
//!
//! POST carries an enveloped signature inside the document; Redirect
//! signs the URL-encoded query string. Verification accepts any of the
//! configured IdP certificates so certificate rollover does not break
//! logins mid-rotation.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Public};
use openssl::sign::Verifier;
use openssl::x509::X509;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, warn};
use xml_canonicalization::Canonicalizer;

use crate::document::element_ranges;
use crate::error::{SamlError, SamlResult};

const RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const RSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384";
const RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";

const DIGEST_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
const DIGEST_SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

/// Verify the enveloped signature of `xml` against any of `certificates`.
///
/// The reference digest is checked first (over the referenced element
/// with the signature removed, exclusive C14N), then the canonicalized
/// SignedInfo is verified against each certificate until one matches.
pub fn verify_enveloped(xml: &str, certificates: &[String]) -> SamlResult<()> {
    if certificates.is_empty() {
        return Err(SamlError::InvalidSignature(
            "no IdP certificate configured".to_string(),
        ));
    }

    let sig_info = extract_signature_info(xml)?;
    verify_reference_digest(xml, &sig_info)?;

    let canonical_signed_info = canonicalize_xml(&sig_info.signed_info)?;
    let signature_bytes = STANDARD
        .decode(sig_info.signature_value.replace(['\n', '\r', ' '], ""))
        .map_err(|e| SamlError::InvalidSignature(format!("bad signature encoding: {e}")))?;
    let digest = signature_digest(&sig_info.signature_method)?;

    for (index, cert) in certificates.iter().enumerate() {
        let public_key = match certificate_public_key(cert) {
            Ok(key) => key,
            Err(e) => {
                warn!(index, error = %e, "skipping unparsable IdP certificate");
                continue;
            }
        };
        if verify_bytes(digest, &public_key, canonical_signed_info.as_bytes(), &signature_bytes)? {
            debug!(index, "document signature verified");
            return Ok(());
        }
    }
    Err(SamlError::InvalidSignature(
        "signature matches no configured certificate".to_string(),
    ))
}

/// Verify a Redirect-binding signature.
///
/// The signed data is the URL-encoded query string in transmission
/// order: `SAMLResponse=..[&RelayState=..]&SigAlg=..`.
pub fn verify_redirect_signature(
    saml_response: &str,
    relay_state: Option<&str>,
    sig_alg: &str,
    signature: &str,
    certificates: &[String],
) -> SamlResult<()> {
    if certificates.is_empty() {
        return Err(SamlError::InvalidSignature(
            "no IdP certificate configured".to_string(),
        ));
    }

    let mut signed_data = format!("SAMLResponse={saml_response}");
    if let Some(rs) = relay_state {
        if !rs.is_empty() {
            signed_data.push_str("&RelayState=");
            signed_data.push_str(rs);
        }
    }
    signed_data.push_str("&SigAlg=");
    signed_data.push_str(sig_alg);

    let signature_bytes = STANDARD
        .decode(signature)
        .map_err(|e| SamlError::InvalidSignature(format!("bad signature encoding: {e}")))?;

    let decoded_alg = urlencoding::decode(sig_alg)
        .map_err(|e| SamlError::InvalidSignature(format!("bad SigAlg encoding: {e}")))?;
    let digest = signature_digest(&decoded_alg)?;

    for (index, cert) in certificates.iter().enumerate() {
        let public_key = match certificate_public_key(cert) {
            Ok(key) => key,
            Err(e) => {
                warn!(index, error = %e, "skipping unparsable IdP certificate");
                continue;
            }
        };
        if verify_bytes(digest, &public_key, signed_data.as_bytes(), &signature_bytes)? {
            debug!(index, "redirect signature verified");
            return Ok(());
        }
    }
    Err(SamlError::InvalidSignature(
        "signature matches no configured certificate".to_string(),
    ))
}

fn verify_bytes(
    digest: MessageDigest,
    public_key: &PKey<Public>,
    data: &[u8],
    signature: &[u8],
) -> SamlResult<bool> {
    let mut verifier = Verifier::new(digest, public_key)
        .map_err(|e| SamlError::InvalidSignature(format!("verifier setup failed: {e}")))?;
    verifier
        .update(data)
        .map_err(|e| SamlError::InvalidSignature(format!("verifier update failed: {e}")))?;
    // A wrong key yields Ok(false); only infrastructure failures error.
    Ok(verifier.verify(signature).unwrap_or(false))
}

fn signature_digest(algorithm: &str) -> SamlResult<MessageDigest> {
    match algorithm {
        RSA_SHA256 => Ok(MessageDigest::sha256()),
        RSA_SHA1 => Ok(MessageDigest::sha1()),
        RSA_SHA384 => Ok(MessageDigest::sha384()),
        RSA_SHA512 => Ok(MessageDigest::sha512()),
        other => Err(SamlError::InvalidSignature(format!(
            "unsupported signature algorithm {other}"
        ))),
    }
}

fn reference_digest(algorithm: &str) -> MessageDigest {
    match algorithm {
        DIGEST_SHA1 => MessageDigest::sha1(),
        DIGEST_SHA512 => MessageDigest::sha512(),
        // DIGEST_SHA256, and the default when the method is absent.
        _ => MessageDigest::sha256(),
    }
}

/// Parse an X.509 certificate from PEM, or bare base64 DER as stored
/// in metadata and admin consoles.
pub(crate) fn parse_certificate(pem: &str) -> SamlResult<X509> {
    let pem_data = if pem.contains("-----BEGIN CERTIFICATE-----") {
        pem.to_string()
    } else {
        format!(
            "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----",
            pem.trim()
        )
    };
    X509::from_pem(pem_data.as_bytes())
        .map_err(|e| SamlError::InvalidSignature(format!("bad certificate: {e}")))
}

fn certificate_public_key(pem: &str) -> SamlResult<PKey<Public>> {
    parse_certificate(pem)?
        .public_key()
        .map_err(|e| SamlError::InvalidSignature(format!("certificate has no usable key: {e}")))
}

/// Exclusive XML Canonicalization without comments.
pub(crate) fn canonicalize_xml(xml: &str) -> SamlResult<String> {
    let mut output = Vec::new();
    Canonicalizer::read_from_str(xml)
        .write_to_writer(&mut output)
        .canonicalize(false)
        .map_err(|e| SamlError::InvalidSignature(format!("canonicalization failed: {e}")))?;
    String::from_utf8(output)
        .map_err(|e| SamlError::InvalidSignature(format!("canonical form is not UTF-8: {e}")))
}

struct SignatureInfo {
    signed_info: String,
    signature_value: String,
    signature_method: String,
    digest_method: String,
    reference_uri: String,
    digest_value: String,
}

/// Extract the first signature's components, preserving the SignedInfo
/// text exactly as serialized.
fn extract_signature_info(xml: &str) -> SamlResult<SignatureInfo> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut in_signed_info = false;
    let mut in_signature_value = false;
    let mut in_digest_value = false;
    let mut signed_info = String::new();
    let mut signature_value = String::new();
    let mut signature_method = String::new();
    let mut digest_method = String::new();
    let mut digest_value = String::new();
    let mut reference_uri = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local = e.local_name();
                let name = std::str::from_utf8(local.as_ref()).unwrap_or("");
                if name == "SignedInfo" && signed_info.is_empty() {
                    in_signed_info = true;
                    push_start_tag(&mut signed_info, &e);
                } else if in_signed_info {
                    push_start_tag(&mut signed_info, &e);
                    // DigestValue lives inside SignedInfo; its text
                    // must land in both buffers.
                    if name == "DigestValue" {
                        in_digest_value = true;
                    }
                    capture_signed_info_attrs(
                        name,
                        &e,
                        &mut signature_method,
                        &mut digest_method,
                        &mut reference_uri,
                    );
                } else if name == "SignatureValue" && signature_value.is_empty() {
                    in_signature_value = true;
                } else if name == "DigestValue" {
                    in_digest_value = true;
                }
            }
            Ok(Event::Empty(e)) => {
                if in_signed_info {
                    let local = e.local_name();
                    let name = std::str::from_utf8(local.as_ref()).unwrap_or("");
                    let tag = std::str::from_utf8(&e).unwrap_or("");
                    signed_info.push('<');
                    signed_info.push_str(tag);
                    signed_info.push_str("/>");
                    capture_signed_info_attrs(
                        name,
                        &e,
                        &mut signature_method,
                        &mut digest_method,
                        &mut reference_uri,
                    );
                }
            }
            Ok(Event::End(e)) => {
                let local = e.local_name();
                let name = std::str::from_utf8(local.as_ref()).unwrap_or("");
                if in_signed_info {
                    signed_info.push_str("</");
                    signed_info.push_str(std::str::from_utf8(e.name().as_ref()).unwrap_or(""));
                    signed_info.push('>');
                    if name == "DigestValue" {
                        in_digest_value = false;
                    }
                    if name == "SignedInfo" {
                        in_signed_info = false;
                    }
                } else if name == "SignatureValue" {
                    in_signature_value = false;
                } else if name == "DigestValue" {
                    in_digest_value = false;
                } else if name == "Signature" && !signature_value.is_empty() {
                    // Only the first signature is the caller's.
                    break;
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default();
                if in_signed_info {
                    signed_info.push_str(&text);
                    if in_digest_value && digest_value.is_empty() {
                        digest_value.push_str(&text);
                    }
                } else if in_signature_value {
                    signature_value.push_str(&text);
                } else if in_digest_value && digest_value.is_empty() {
                    digest_value.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SamlError::InvalidSignature(format!("XML parse error: {e}")))
            }
            _ => {}
        }
    }

    if signed_info.is_empty() {
        return Err(SamlError::InvalidSignature(
            "no SignedInfo element found".to_string(),
        ));
    }
    if signature_value.is_empty() {
        return Err(SamlError::InvalidSignature(
            "no SignatureValue element found".to_string(),
        ));
    }

    Ok(SignatureInfo {
        signed_info,
        signature_value,
        signature_method,
        digest_method,
        reference_uri,
        digest_value,
    })
}

fn push_start_tag(out: &mut String, e: &quick_xml::events::BytesStart<'_>) {
    let tag = std::str::from_utf8(e).unwrap_or("");
    out.push('<');
    out.push_str(tag);
    out.push('>');
}

fn capture_signed_info_attrs(
    name: &str,
    e: &quick_xml::events::BytesStart<'_>,
    signature_method: &mut String,
    digest_method: &mut String,
    reference_uri: &mut String,
) {
    let attr = |key: &str| -> Option<String> {
        e.attributes().flatten().find_map(|a| {
            (a.key.as_ref() == key.as_bytes())
                .then(|| a.unescape_value().unwrap_or_default().to_string())
        })
    };
    match name {
        "SignatureMethod" => {
            if let Some(alg) = attr("Algorithm") {
                *signature_method = alg;
            }
        }
        "DigestMethod" => {
            if let Some(alg) = attr("Algorithm") {
                *digest_method = alg;
            }
        }
        "Reference" => {
            if let Some(uri) = attr("URI") {
                *reference_uri = uri;
            }
        }
        _ => {}
    }
}

fn verify_reference_digest(xml: &str, sig_info: &SignatureInfo) -> SamlResult<()> {
    let element_id = sig_info.reference_uri.trim_start_matches('#');

    let referenced = if element_id.is_empty() {
        xml
    } else {
        let id_pattern = format!("ID=\"{element_id}\"");
        let id_pos = xml.find(&id_pattern).ok_or_else(|| {
            SamlError::InvalidSignature(format!("referenced element {element_id} not found"))
        })?;
        let start = xml[..id_pos].rfind('<').unwrap_or(0);
        let tag_name = xml[start + 1..]
            .split(|c: char| c.is_whitespace() || c == '>')
            .next()
            .unwrap_or("");
        let close_tag = format!("</{tag_name}>");
        let end = xml[start..]
            .find(&close_tag)
            .map(|pos| start + pos + close_tag.len())
            .ok_or_else(|| {
                SamlError::InvalidSignature(format!("unterminated element {tag_name}"))
            })?;
        &xml[start..end]
    };

    let without_signature = remove_first_signature(referenced);
    let canonical = canonicalize_xml(&without_signature)?;
    let digest = openssl::hash::hash(
        reference_digest(&sig_info.digest_method),
        canonical.as_bytes(),
    )
    .map_err(|e| SamlError::InvalidSignature(format!("digest failed: {e}")))?;

    let computed = STANDARD.encode(digest);
    let expected = sig_info.digest_value.replace(['\n', '\r', ' '], "");
    if computed != expected {
        return Err(SamlError::InvalidSignature("digest mismatch".to_string()));
    }
    Ok(())
}

/// Remove the first Signature subtree (enveloped-signature transform).
pub(crate) fn remove_first_signature(xml: &str) -> String {
    match element_ranges(xml, "Signature").first() {
        Some(&(start, end)) => {
            let mut result = String::with_capacity(xml.len());
            result.push_str(&xml[..start]);
            result.push_str(&xml[end..]);
            result
        }
        None => xml.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{sign_enveloped, TestIdp};

    #[test]
    fn test_enveloped_signature_round_trip() {
        let idp = TestIdp::generate();
        let xml = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_r1"><saml:Issuer xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion">https://idp.example.com</saml:Issuer></samlp:Response>"#;
        let signed = sign_enveloped(&idp, xml, "_r1");

        verify_enveloped(&signed, &[idp.certificate_pem.clone()]).unwrap();
    }

    #[test]
    fn test_digest_value_extracted_from_signed_info() {
        let idp = TestIdp::generate();
        let xml = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_r1"><saml:Issuer xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion">https://idp.example.com</saml:Issuer></samlp:Response>"#;
        let signed = sign_enveloped(&idp, xml, "_r1");

        let sig_info = extract_signature_info(&signed).unwrap();
        // The digest must come out of SignedInfo, not stay swallowed
        // by the SignedInfo text buffer.
        assert!(!sig_info.digest_value.is_empty());
        assert!(sig_info.signed_info.contains(&sig_info.digest_value));
        verify_reference_digest(&signed, &sig_info).unwrap();
    }

    #[test]
    fn test_tampered_document_fails_digest() {
        let idp = TestIdp::generate();
        let xml = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_r1"><saml:Issuer xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion">https://idp.example.com</saml:Issuer></samlp:Response>"#;
        let signed = sign_enveloped(&idp, xml, "_r1");
        let tampered = signed.replace("idp.example.com", "evil.example.com");

        let err = verify_enveloped(&tampered, &[idp.certificate_pem.clone()]).unwrap_err();
        assert!(matches!(err, SamlError::InvalidSignature(_)));
    }

    #[test]
    fn test_wrong_certificate_fails_then_rotated_one_passes() {
        let signer = TestIdp::generate();
        let other = TestIdp::generate();
        let xml = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_r1"><saml:Issuer xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion">x</saml:Issuer></samlp:Response>"#;
        let signed = sign_enveloped(&signer, xml, "_r1");

        let err = verify_enveloped(&signed, &[other.certificate_pem.clone()]).unwrap_err();
        assert!(matches!(err, SamlError::InvalidSignature(_)));

        // Rollover: old certificate first, new one second.
        verify_enveloped(
            &signed,
            &[other.certificate_pem.clone(), signer.certificate_pem.clone()],
        )
        .unwrap();
    }

    #[test]
    fn test_unsigned_document_has_no_signed_info() {
        let err = verify_enveloped("<samlp:Response ID=\"_r1\"/>", &["x".to_string()]).unwrap_err();
        assert!(matches!(err, SamlError::InvalidSignature(_)));
    }

    #[test]
    fn test_redirect_signature_round_trip() {
        let idp = TestIdp::generate();
        let payload = urlencoding::encode("base64payload==").to_string();
        let relay = urlencoding::encode("relay-1").to_string();
        let sig_alg = urlencoding::encode(RSA_SHA256).to_string();

        let signed_data = format!("SAMLResponse={payload}&RelayState={relay}&SigAlg={sig_alg}");
        let signature = STANDARD.encode(idp.sign_sha256(signed_data.as_bytes()));

        verify_redirect_signature(
            &payload,
            Some(&relay),
            &sig_alg,
            &signature,
            &[idp.certificate_pem.clone()],
        )
        .unwrap();

        // Altered RelayState breaks the signature.
        let err = verify_redirect_signature(
            &payload,
            Some("other"),
            &sig_alg,
            &signature,
            &[idp.certificate_pem.clone()],
        )
        .unwrap_err();
        assert!(matches!(err, SamlError::InvalidSignature(_)));
    }
}
