//! Test-only helpers: a throwaway IdP identity and an enveloped
//! signer producing documents our verifier accepts.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::sign::Signer;
use openssl::x509::{X509Builder, X509NameBuilder, X509};

use crate::signature::canonicalize_xml;

pub(crate) struct TestIdp {
    pub pkey: PKey<Private>,
    pub certificate: X509,
    pub certificate_pem: String,
}

impl TestIdp {
    pub fn generate() -> Self {
        let rsa = Rsa::generate(2048).unwrap();
        let pkey = PKey::from_rsa(rsa).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "test-idp").unwrap();
        let name = name.build();

        let mut serial = BigNum::new().unwrap();
        serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder
            .set_serial_number(&serial.to_asn1_integer().unwrap())
            .unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        builder.set_pubkey(&pkey).unwrap();
        builder.sign(&pkey, MessageDigest::sha256()).unwrap();
        let certificate = builder.build();

        let certificate_pem = String::from_utf8(certificate.to_pem().unwrap()).unwrap();
        Self {
            pkey,
            certificate,
            certificate_pem,
        }
    }

    pub fn sign_sha256(&self, data: &[u8]) -> Vec<u8> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.pkey).unwrap();
        signer.update(data).unwrap();
        signer.sign_to_vec().unwrap()
    }

    pub fn certificate_base64_der(&self) -> String {
        STANDARD.encode(self.certificate.to_der().unwrap())
    }
}

/// Envelope-sign `xml`, referencing `element_id`, inserting the
/// Signature right after the first Issuer close tag (or the root start
/// tag when there is none). The signature is inserted without
/// surrounding whitespace so removal restores the input byte for byte.
pub(crate) fn sign_enveloped(idp: &TestIdp, xml: &str, element_id: &str) -> String {
    let canonical = canonicalize_xml(xml).unwrap();
    let digest = openssl::hash::hash(MessageDigest::sha256(), canonical.as_bytes()).unwrap();
    let digest_b64 = STANDARD.encode(digest);

    let mut signed_info = String::new();
    signed_info.push_str("<ds:SignedInfo xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">");
    signed_info.push_str(
        "<ds:CanonicalizationMethod Algorithm=\"http://www.w3.org/2001/10/xml-exc-c14n#\"/>",
    );
    signed_info.push_str(
        "<ds:SignatureMethod Algorithm=\"http://www.w3.org/2001/04/xmldsig-more#rsa-sha256\"/>",
    );
    signed_info.push_str("<ds:Reference URI=\"#");
    signed_info.push_str(element_id);
    signed_info.push_str("\">");
    signed_info.push_str("<ds:Transforms>");
    signed_info.push_str(
        "<ds:Transform Algorithm=\"http://www.w3.org/2000/09/xmldsig#enveloped-signature\"/>",
    );
    signed_info.push_str("<ds:Transform Algorithm=\"http://www.w3.org/2001/10/xml-exc-c14n#\"/>");
    signed_info.push_str("</ds:Transforms>");
    signed_info.push_str("<ds:DigestMethod Algorithm=\"http://www.w3.org/2001/04/xmlenc#sha256\"/>");
    signed_info.push_str("<ds:DigestValue>");
    signed_info.push_str(&digest_b64);
    signed_info.push_str("</ds:DigestValue>");
    signed_info.push_str("</ds:Reference>");
    signed_info.push_str("</ds:SignedInfo>");

    let canonical_signed_info = canonicalize_xml(&signed_info).unwrap();
    let signature_b64 = STANDARD.encode(idp.sign_sha256(canonical_signed_info.as_bytes()));

    let mut signature_xml = String::new();
    signature_xml.push_str("<ds:Signature xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">");
    signature_xml.push_str(&signed_info);
    signature_xml.push_str("<ds:SignatureValue>");
    signature_xml.push_str(&signature_b64);
    signature_xml.push_str("</ds:SignatureValue><ds:KeyInfo><ds:X509Data><ds:X509Certificate>");
    signature_xml.push_str(&idp.certificate_base64_der());
    signature_xml.push_str("</ds:X509Certificate></ds:X509Data></ds:KeyInfo></ds:Signature>");

    let insert_at = xml
        .find("</saml:Issuer>")
        .map(|pos| pos + "</saml:Issuer>".len())
        .or_else(|| xml.find('>').map(|pos| pos + 1))
        .unwrap_or(0);

    let mut result = String::with_capacity(xml.len() + signature_xml.len());
    result.push_str(&xml[..insert_at]);
    result.push_str(&signature_xml);
    result.push_str(&xml[insert_at..]);
    result
}
