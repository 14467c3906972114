//! SAML document parsing.
//!
//! One pass splits the raw XML into assertion slices and a skeleton
//! (the document with assertion subtrees removed), then each part is
//! parsed on its own. Keeping the raw slices around matters: signature
//! digests are computed over the original bytes, and the draft carries
//! the assertion exactly as the IdP serialized it.

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{SamlError, SamlResult};

pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";
pub const STATUS_AUTHN_FAILED: &str = "urn:oasis:names:tc:SAML:2.0:status:AuthnFailed";

/// NameID format indicating an email address.
pub const NAMEID_FORMAT_EMAIL: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress";

/// X.500 email attribute name.
pub const EMAIL_ATTRIBUTE_OID: &str = "urn:oid:1.2.840.113549.1.9.1";

/// A parsed SAML protocol message plus the original text.
#[derive(Debug, Clone)]
pub struct SamlDocumentHolder {
    pub kind: DocumentKind,
    pub raw_xml: String,
}

#[derive(Debug, Clone)]
pub enum DocumentKind {
    LoginResponse(ResponseDocument),
    LogoutRequest(LogoutRequestDocument),
    LogoutResponse(StatusDocument),
}

#[derive(Debug, Clone, Default)]
pub struct ResponseDocument {
    pub id: Option<String>,
    pub in_response_to: Option<String>,
    pub destination: Option<String>,
    pub issue_instant: Option<DateTime<Utc>>,
    pub issuer: Option<String>,
    pub status_code: Option<String>,
    pub nested_status_code: Option<String>,
    /// Whether the Response element itself carries a Signature.
    pub signed: bool,
    pub assertions: Vec<Assertion>,
    /// Raw `<EncryptedAssertion>` subtrees, decrypted later.
    pub encrypted_assertions: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Assertion {
    pub issuer: Option<String>,
    pub name_id: Option<NameId>,
    /// Raw `<EncryptedID>` subtree when the subject is encrypted.
    pub encrypted_name_id: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_on_or_after: Option<DateTime<Utc>>,
    pub audiences: Vec<String>,
    pub attributes: Vec<SamlAttribute>,
    pub session_index: Option<String>,
    /// InResponseTo from SubjectConfirmationData, when present.
    pub confirmation_in_response_to: Option<String>,
    pub signed: bool,
    /// The assertion exactly as serialized by the IdP.
    pub raw_xml: String,
}

#[derive(Debug, Clone)]
pub struct NameId {
    pub value: String,
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SamlAttribute {
    pub name: String,
    pub friendly_name: Option<String>,
    pub values: Vec<String>,
}

impl Assertion {
    /// First value of the attribute with this Name.
    #[must_use]
    pub fn attribute_value(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .and_then(|a| a.values.first())
            .map(String::as_str)
    }

    /// First value of the attribute with this FriendlyName.
    #[must_use]
    pub fn friendly_attribute_value(&self, friendly: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.friendly_name.as_deref() == Some(friendly))
            .and_then(|a| a.values.first())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogoutRequestDocument {
    pub id: Option<String>,
    pub destination: Option<String>,
    pub issue_instant: Option<DateTime<Utc>>,
    pub issuer: Option<String>,
    pub name_id: Option<NameId>,
    pub session_indexes: Vec<String>,
    pub signed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StatusDocument {
    pub in_response_to: Option<String>,
    pub status_code: Option<String>,
}

/// Parse a decoded payload into a typed document.
pub fn parse_document(xml: &str) -> SamlResult<SamlDocumentHolder> {
    let kind = match root_local_name(xml)?.as_str() {
        "Response" => DocumentKind::LoginResponse(parse_response(xml)?),
        "LogoutRequest" => DocumentKind::LogoutRequest(parse_logout_request(xml)?),
        "LogoutResponse" => DocumentKind::LogoutResponse(parse_logout_response(xml)?),
        other => {
            return Err(SamlError::InvalidDocument(format!(
                "unexpected root element {other}"
            )))
        }
    };
    Ok(SamlDocumentHolder {
        kind,
        raw_xml: xml.to_string(),
    })
}

fn root_local_name(xml: &str) -> SamlResult<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e) | Event::Empty(e)) => {
                let local = e.local_name();
                return Ok(std::str::from_utf8(local.as_ref())
                    .unwrap_or("")
                    .to_string());
            }
            Ok(Event::Eof) => {
                return Err(SamlError::InvalidDocument("empty document".to_string()))
            }
            Err(e) => {
                return Err(SamlError::InvalidDocument(format!("XML parse error: {e}")))
            }
            _ => {}
        }
    }
}

/// Byte ranges of `<..:local>...</..:local>` subtrees, tags included.
pub(crate) fn element_ranges(xml: &str, local: &str) -> Vec<(usize, usize)> {
    let bytes = xml.as_bytes();
    let mut ranges = Vec::new();
    let mut pos = 0;

    while let Some(offset) = xml[pos..].find('<') {
        let start = pos + offset;
        let rest = &xml[start + 1..];
        if rest.starts_with('/') || rest.starts_with('!') || rest.starts_with('?') {
            pos = start + 1;
            continue;
        }

        let name_end = rest
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .unwrap_or(rest.len());
        let full_name = &rest[..name_end];
        let local_name = full_name.rsplit(':').next().unwrap_or(full_name);

        if local_name != local {
            pos = start + 1;
            continue;
        }

        // Self-closing element.
        if let Some(tag_close) = xml[start..].find('>') {
            let tag_end = start + tag_close;
            if bytes[tag_end - 1] == b'/' {
                ranges.push((start, tag_end + 1));
                pos = tag_end + 1;
                continue;
            }
            let close_tag = format!("</{full_name}>");
            if let Some(end_offset) = xml[tag_end..].find(&close_tag) {
                let end = tag_end + end_offset + close_tag.len();
                ranges.push((start, end));
                pos = end;
                continue;
            }
        }
        pos = start + 1;
    }
    ranges
}

/// The document with the given subtrees cut out.
fn without_ranges(xml: &str, ranges: &[(usize, usize)]) -> String {
    let mut result = String::with_capacity(xml.len());
    let mut cursor = 0;
    for &(start, end) in ranges {
        result.push_str(&xml[cursor..start]);
        cursor = end;
    }
    result.push_str(&xml[cursor..]);
    result
}

fn parse_response(xml: &str) -> SamlResult<ResponseDocument> {
    let assertion_ranges = element_ranges(xml, "Assertion");
    let encrypted_ranges = element_ranges(xml, "EncryptedAssertion");

    // Assertions nested inside EncryptedAssertion ciphertext cannot
    // occur, but an Assertion range inside an encrypted range would
    // mean malformed scanning; drop those.
    let assertion_ranges: Vec<(usize, usize)> = assertion_ranges
        .into_iter()
        .filter(|&(s, _)| !encrypted_ranges.iter().any(|&(es, ee)| s > es && s < ee))
        .collect();

    let mut cut: Vec<(usize, usize)> = assertion_ranges
        .iter()
        .chain(encrypted_ranges.iter())
        .copied()
        .collect();
    cut.sort_unstable();
    let skeleton = without_ranges(xml, &cut);

    let mut doc = parse_response_skeleton(&skeleton)?;
    for &(start, end) in &assertion_ranges {
        doc.assertions.push(parse_assertion(&xml[start..end])?);
    }
    for &(start, end) in &encrypted_ranges {
        doc.encrypted_assertions.push(xml[start..end].to_string());
    }
    Ok(doc)
}

fn parse_response_skeleton(xml: &str) -> SamlResult<ResponseDocument> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut doc = ResponseDocument::default();
    let mut in_issuer = false;
    let mut status_depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e) | Event::Empty(e)) => {
                let local = e.local_name();
                let name = std::str::from_utf8(local.as_ref()).unwrap_or("");
                match name {
                    "Response" => {
                        for attr in e.attributes().flatten() {
                            let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
                            let value = attr.unescape_value().unwrap_or_default();
                            match key {
                                "ID" => doc.id = Some(value.to_string()),
                                "InResponseTo" => doc.in_response_to = Some(value.to_string()),
                                "Destination" => doc.destination = Some(value.to_string()),
                                "IssueInstant" => {
                                    doc.issue_instant = parse_instant(&value)?;
                                }
                                _ => {}
                            }
                        }
                    }
                    "Issuer" => in_issuer = true,
                    "StatusCode" => {
                        let value = attr_value(&e, "Value");
                        match status_depth {
                            0 => doc.status_code = value,
                            _ => {
                                if doc.nested_status_code.is_none() {
                                    doc.nested_status_code = value;
                                }
                            }
                        }
                        status_depth += 1;
                    }
                    "Signature" => doc.signed = true,
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if in_issuer && doc.issuer.is_none() {
                    doc.issuer = Some(e.unescape().unwrap_or_default().to_string());
                }
            }
            Ok(Event::End(e)) => {
                let local = e.local_name();
                if local.as_ref() == b"Issuer" {
                    in_issuer = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SamlError::InvalidDocument(format!("XML parse error: {e}")))
            }
            _ => {}
        }
    }
    Ok(doc)
}

pub(crate) fn parse_assertion(xml: &str) -> SamlResult<Assertion> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut assertion = Assertion {
        raw_xml: xml.to_string(),
        ..Assertion::default()
    };
    let mut in_issuer = false;
    let mut in_name_id = false;
    let mut in_audience = false;
    let mut in_attribute_value = false;
    let mut in_signature = false;
    let mut name_id_format = None;
    let mut current_attribute: Option<SamlAttribute> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e) | Event::Empty(e)) => {
                let local = e.local_name();
                let name = std::str::from_utf8(local.as_ref()).unwrap_or("");
                match name {
                    "Issuer" if !in_signature => in_issuer = true,
                    "NameID" => {
                        in_name_id = true;
                        name_id_format = attr_value(&e, "Format");
                    }
                    "EncryptedID" => {
                        if let Some(&(start, end)) = element_ranges(xml, "EncryptedID").first() {
                            assertion.encrypted_name_id = Some(xml[start..end].to_string());
                        }
                    }
                    "Conditions" => {
                        if let Some(raw) = attr_value(&e, "NotBefore") {
                            assertion.not_before = parse_instant(&raw)?;
                        }
                        if let Some(raw) = attr_value(&e, "NotOnOrAfter") {
                            assertion.not_on_or_after = parse_instant(&raw)?;
                        }
                    }
                    "Audience" => in_audience = true,
                    "SubjectConfirmationData" => {
                        if let Some(value) = attr_value(&e, "InResponseTo") {
                            assertion.confirmation_in_response_to = Some(value);
                        }
                    }
                    "AuthnStatement" => {
                        if let Some(value) = attr_value(&e, "SessionIndex") {
                            assertion.session_index = Some(value);
                        }
                    }
                    "Attribute" => {
                        current_attribute = Some(SamlAttribute {
                            name: attr_value(&e, "Name").unwrap_or_default(),
                            friendly_name: attr_value(&e, "FriendlyName"),
                            values: Vec::new(),
                        });
                    }
                    "AttributeValue" => in_attribute_value = true,
                    "Signature" => {
                        in_signature = true;
                        assertion.signed = true;
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default();
                if in_issuer && assertion.issuer.is_none() {
                    assertion.issuer = Some(text.to_string());
                } else if in_name_id {
                    assertion.name_id = Some(NameId {
                        value: text.to_string(),
                        format: name_id_format.take(),
                    });
                } else if in_audience {
                    assertion.audiences.push(text.to_string());
                } else if in_attribute_value {
                    if let Some(attr) = current_attribute.as_mut() {
                        attr.values.push(text.to_string());
                    }
                }
            }
            Ok(Event::End(e)) => {
                let local = e.local_name();
                match local.as_ref() {
                    b"Issuer" => in_issuer = false,
                    b"NameID" => in_name_id = false,
                    b"Audience" => in_audience = false,
                    b"AttributeValue" => in_attribute_value = false,
                    b"Signature" => in_signature = false,
                    b"Attribute" => {
                        if let Some(attr) = current_attribute.take() {
                            assertion.attributes.push(attr);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SamlError::InvalidDocument(format!("XML parse error: {e}")))
            }
            _ => {}
        }
    }
    Ok(assertion)
}

fn parse_logout_request(xml: &str) -> SamlResult<LogoutRequestDocument> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut doc = LogoutRequestDocument::default();
    let mut in_issuer = false;
    let mut in_name_id = false;
    let mut in_session_index = false;
    let mut name_id_format = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e) | Event::Empty(e)) => {
                let local = e.local_name();
                let name = std::str::from_utf8(local.as_ref()).unwrap_or("");
                match name {
                    "LogoutRequest" => {
                        for attr in e.attributes().flatten() {
                            let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
                            let value = attr.unescape_value().unwrap_or_default();
                            match key {
                                "ID" => doc.id = Some(value.to_string()),
                                "Destination" => doc.destination = Some(value.to_string()),
                                "IssueInstant" => doc.issue_instant = parse_instant(&value)?,
                                _ => {}
                            }
                        }
                    }
                    "Issuer" => in_issuer = true,
                    "NameID" => {
                        in_name_id = true;
                        name_id_format = attr_value(&e, "Format");
                    }
                    "SessionIndex" => in_session_index = true,
                    "Signature" => doc.signed = true,
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default();
                if in_issuer && doc.issuer.is_none() {
                    doc.issuer = Some(text.to_string());
                } else if in_name_id {
                    doc.name_id = Some(NameId {
                        value: text.to_string(),
                        format: name_id_format.take(),
                    });
                } else if in_session_index {
                    doc.session_indexes.push(text.to_string());
                }
            }
            Ok(Event::End(e)) => {
                let local = e.local_name();
                match local.as_ref() {
                    b"Issuer" => in_issuer = false,
                    b"NameID" => in_name_id = false,
                    b"SessionIndex" => in_session_index = false,
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SamlError::InvalidDocument(format!("XML parse error: {e}")))
            }
            _ => {}
        }
    }
    Ok(doc)
}

fn parse_logout_response(xml: &str) -> SamlResult<StatusDocument> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut doc = StatusDocument::default();
    let mut seen_status = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e) | Event::Empty(e)) => {
                let local = e.local_name();
                let name = std::str::from_utf8(local.as_ref()).unwrap_or("");
                match name {
                    "LogoutResponse" => {
                        if let Some(value) = attr_value(&e, "InResponseTo") {
                            doc.in_response_to = Some(value);
                        }
                    }
                    "StatusCode" if !seen_status => {
                        doc.status_code = attr_value(&e, "Value");
                        seen_status = true;
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SamlError::InvalidDocument(format!("XML parse error: {e}")))
            }
            _ => {}
        }
    }
    Ok(doc)
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes().flatten().find_map(|attr| {
        if attr.key.as_ref() == key.as_bytes() {
            Some(attr.unescape_value().unwrap_or_default().to_string())
        } else {
            None
        }
    })
}

fn parse_instant(raw: &str) -> SamlResult<Option<DateTime<Utc>>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| Some(dt.with_timezone(&Utc)))
        .map_err(|e| SamlError::InvalidDocument(format!("bad timestamp {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response() -> String {
        let now = Utc::now().to_rfc3339();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
    xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
    ID="_resp1" InResponseTo="_req1" Version="2.0"
    IssueInstant="{now}"
    Destination="https://sp.example.com/broker/endpoint">
  <saml:Issuer>https://idp.example.com</saml:Issuer>
  <samlp:Status>
    <samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/>
  </samlp:Status>
  <saml:Assertion ID="_a1" Version="2.0" IssueInstant="{now}">
    <saml:Issuer>https://idp.example.com</saml:Issuer>
    <saml:Subject>
      <saml:NameID Format="urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress">kim@example.com</saml:NameID>
      <saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer">
        <saml:SubjectConfirmationData InResponseTo="_req1" Recipient="https://sp.example.com/broker/endpoint"/>
      </saml:SubjectConfirmation>
    </saml:Subject>
    <saml:Conditions NotBefore="2020-01-01T00:00:00Z" NotOnOrAfter="2099-01-01T00:00:00Z">
      <saml:AudienceRestriction>
        <saml:Audience>https://sp.example.com</saml:Audience>
      </saml:AudienceRestriction>
    </saml:Conditions>
    <saml:AuthnStatement SessionIndex="sess-42"/>
    <saml:AttributeStatement>
      <saml:Attribute Name="urn:oid:1.2.840.113549.1.9.1" FriendlyName="email">
        <saml:AttributeValue>kim@example.com</saml:AttributeValue>
      </saml:Attribute>
      <saml:Attribute Name="role">
        <saml:AttributeValue>admin</saml:AttributeValue>
        <saml:AttributeValue>user</saml:AttributeValue>
      </saml:Attribute>
    </saml:AttributeStatement>
  </saml:Assertion>
</samlp:Response>"#
        )
    }

    #[test]
    fn test_parse_login_response() {
        let holder = parse_document(&sample_response()).unwrap();
        let DocumentKind::LoginResponse(doc) = holder.kind else {
            panic!("expected login response");
        };

        assert_eq!(doc.id.as_deref(), Some("_resp1"));
        assert_eq!(doc.in_response_to.as_deref(), Some("_req1"));
        assert_eq!(
            doc.destination.as_deref(),
            Some("https://sp.example.com/broker/endpoint")
        );
        assert_eq!(doc.issuer.as_deref(), Some("https://idp.example.com"));
        assert_eq!(doc.status_code.as_deref(), Some(STATUS_SUCCESS));
        assert_eq!(doc.assertions.len(), 1);

        let assertion = &doc.assertions[0];
        assert_eq!(
            assertion.name_id.as_ref().unwrap().value,
            "kim@example.com"
        );
        assert_eq!(
            assertion.name_id.as_ref().unwrap().format.as_deref(),
            Some(NAMEID_FORMAT_EMAIL)
        );
        assert_eq!(assertion.session_index.as_deref(), Some("sess-42"));
        assert_eq!(
            assertion.confirmation_in_response_to.as_deref(),
            Some("_req1")
        );
        assert_eq!(assertion.audiences, vec!["https://sp.example.com"]);
        assert_eq!(
            assertion.attribute_value(EMAIL_ATTRIBUTE_OID),
            Some("kim@example.com")
        );
        assert_eq!(
            assertion.friendly_attribute_value("email"),
            Some("kim@example.com")
        );
        // Multi-valued attributes keep order.
        let roles = assertion
            .attributes
            .iter()
            .find(|a| a.name == "role")
            .unwrap();
        assert_eq!(roles.values, vec!["admin", "user"]);
        // Raw slice round-trips the IdP serialization.
        assert!(assertion.raw_xml.starts_with("<saml:Assertion"));
        assert!(assertion.raw_xml.ends_with("</saml:Assertion>"));
    }

    #[test]
    fn test_nested_status_code() {
        let xml = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_r">
  <samlp:Status>
    <samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Responder">
      <samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:AuthnFailed"/>
    </samlp:StatusCode>
  </samlp:Status>
</samlp:Response>"#;
        let holder = parse_document(xml).unwrap();
        let DocumentKind::LoginResponse(doc) = holder.kind else {
            panic!("expected login response");
        };
        assert_eq!(
            doc.status_code.as_deref(),
            Some("urn:oasis:names:tc:SAML:2.0:status:Responder")
        );
        assert_eq!(doc.nested_status_code.as_deref(), Some(STATUS_AUTHN_FAILED));
    }

    #[test]
    fn test_encrypted_assertion_kept_raw() {
        let xml = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_r">
  <samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>
  <saml:EncryptedAssertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion">
    <xenc:EncryptedData xmlns:xenc="http://www.w3.org/2001/04/xmlenc#"/>
  </saml:EncryptedAssertion>
</samlp:Response>"#;
        let holder = parse_document(xml).unwrap();
        let DocumentKind::LoginResponse(doc) = holder.kind else {
            panic!("expected login response");
        };
        assert!(doc.assertions.is_empty());
        assert_eq!(doc.encrypted_assertions.len(), 1);
        assert!(doc.encrypted_assertions[0].starts_with("<saml:EncryptedAssertion"));
    }

    #[test]
    fn test_parse_logout_request() {
        let now = Utc::now().to_rfc3339();
        let xml = format!(
            r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
    xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
    ID="_lr1" IssueInstant="{now}" Destination="https://sp.example.com/broker/endpoint">
  <saml:Issuer>https://idp.example.com</saml:Issuer>
  <saml:NameID>kim@example.com</saml:NameID>
  <samlp:SessionIndex>sess-42</samlp:SessionIndex>
</samlp:LogoutRequest>"#
        );
        let holder = parse_document(&xml).unwrap();
        let DocumentKind::LogoutRequest(doc) = holder.kind else {
            panic!("expected logout request");
        };
        assert_eq!(doc.id.as_deref(), Some("_lr1"));
        assert_eq!(doc.name_id.unwrap().value, "kim@example.com");
        assert_eq!(doc.session_indexes, vec!["sess-42"]);
    }

    #[test]
    fn test_garbage_is_invalid_document() {
        assert!(matches!(
            parse_document("this is not xml"),
            Err(SamlError::InvalidDocument(_))
        ));
        assert!(matches!(
            parse_document("<Unknown/>"),
            Err(SamlError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_bad_timestamp_rejected() {
        let xml = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_r" IssueInstant="yesterday"/>"#;
        assert!(matches!(
            parse_document(xml),
            Err(SamlError::InvalidDocument(_))
        ));
    }
}
