//! The SAML response pipeline.
//!
//! Decoded binding payloads flow through destination, signature,
//! status, freshness, correlation, decryption, and condition checks
//! before an [`IdentityDraft`] comes out. Logout messages ride the
//! same front half and terminate broker sessions idempotently.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{info, instrument, warn};

use idbridge_core::{IdentityDraft, KeyStore, Verifier};

use crate::bindings::{decode_payload, Binding};
use crate::config::{PrincipalStrategy, SamlProviderConfig};
use crate::crypto::decrypt_element;
use crate::document::{
    parse_assertion, parse_document, Assertion, DocumentKind, LogoutRequestDocument, NameId,
    ResponseDocument, StatusDocument, EMAIL_ATTRIBUTE_OID, NAMEID_FORMAT_EMAIL, STATUS_AUTHN_FAILED,
    STATUS_SUCCESS,
};
use crate::error::{SamlError, SamlResult};
use crate::metadata::MetadataCache;
use crate::sessions::{BrokerSession, SessionRegistry};
use crate::signature::{verify_enveloped, verify_redirect_signature};

/// Redirect-binding query parameters, as transmitted.
///
/// `saml_response`, `relay_state`, and `sig_alg` stay URL-encoded
/// because the signature covers the encoded query string byte for
/// byte; `signature` is the URL-decoded base64 value.
#[derive(Debug, Clone, Copy)]
pub struct RedirectParams<'a> {
    pub saml_response: &'a str,
    pub relay_state: Option<&'a str>,
    pub sig_alg: Option<&'a str>,
    pub signature: Option<&'a str>,
}

/// What a processed message turned out to be.
#[derive(Debug)]
pub enum ProcessedMessage {
    /// A successful login; the draft is ready for resolution.
    Login(IdentityDraft),
    /// An IdP-initiated logout; lists the sessions it terminated.
    /// Empty on replays, which are no-ops rather than errors.
    Logout { terminated: Vec<BrokerSession> },
    /// The IdP acknowledged an SP-initiated logout.
    LogoutAck { in_response_to: Option<String> },
}

/// Validates SAML messages for one identity provider.
pub struct SamlProcessor {
    config: SamlProviderConfig,
    key_store: Arc<dyn KeyStore>,
    metadata: MetadataCache,
    sessions: Arc<SessionRegistry>,
}

impl SamlProcessor {
    #[must_use]
    pub fn new(config: SamlProviderConfig, key_store: Arc<dyn KeyStore>) -> Self {
        Self {
            config,
            key_store,
            metadata: MetadataCache::new(),
            sessions: Arc::new(SessionRegistry::new()),
        }
    }

    #[must_use]
    pub fn with_metadata_cache(mut self, metadata: MetadataCache) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_sessions(mut self, sessions: Arc<SessionRegistry>) -> Self {
        self.sessions = sessions;
        self
    }

    /// The session registry this processor records logins into.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Process an HTTP-POST payload (base64-encoded document).
    ///
    /// `expected_request_id` is the id of the outstanding AuthnRequest
    /// for SP-initiated flows; `None` accepts IdP-initiated responses.
    #[instrument(skip_all, fields(provider = %self.config.provider_alias))]
    pub async fn process_post(
        &self,
        encoded: &str,
        expected_request_id: Option<&str>,
    ) -> SamlResult<ProcessedMessage> {
        let xml = decode_payload(Binding::Post, encoded)?;
        self.process_document(&xml, false, expected_request_id).await
    }

    /// Process an HTTP-Redirect query (base64 + DEFLATE payload, query
    /// string signature).
    #[instrument(skip_all, fields(provider = %self.config.provider_alias))]
    pub async fn process_redirect(
        &self,
        params: RedirectParams<'_>,
        expected_request_id: Option<&str>,
    ) -> SamlResult<ProcessedMessage> {
        let mut transport_signed = false;
        if self.config.validate_signature {
            match (params.sig_alg, params.signature) {
                (Some(sig_alg), Some(signature)) => {
                    let certificates = self.signing_certificates().await?;
                    verify_redirect_signature(
                        params.saml_response,
                        params.relay_state,
                        sig_alg,
                        signature,
                        &certificates,
                    )?;
                    transport_signed = true;
                }
                _ => {
                    return Err(SamlError::InvalidSignature(
                        "redirect message carries no signature".to_string(),
                    ))
                }
            }
        }

        let encoded = urlencoding::decode(params.saml_response)
            .map_err(|e| SamlError::InvalidDocument(format!("bad URL encoding: {e}")))?;
        let xml = decode_payload(Binding::Redirect, &encoded)?;
        self.process_document(&xml, transport_signed, expected_request_id)
            .await
    }

    async fn process_document(
        &self,
        xml: &str,
        transport_signed: bool,
        expected_request_id: Option<&str>,
    ) -> SamlResult<ProcessedMessage> {
        let holder = parse_document(xml)?;
        match holder.kind {
            DocumentKind::LoginResponse(doc) => self
                .process_login(&holder.raw_xml, doc, transport_signed, expected_request_id)
                .await
                .map(ProcessedMessage::Login),
            DocumentKind::LogoutRequest(doc) => self
                .process_logout_request(&holder.raw_xml, doc, transport_signed)
                .await
                .map(|terminated| ProcessedMessage::Logout { terminated }),
            DocumentKind::LogoutResponse(doc) => self.process_logout_response(doc),
        }
    }

    async fn process_login(
        &self,
        raw_xml: &str,
        doc: ResponseDocument,
        transport_signed: bool,
        expected_request_id: Option<&str>,
    ) -> SamlResult<IdentityDraft> {
        self.check_destination(doc.destination.as_deref(), doc.signed || transport_signed)?;
        self.check_freshness(doc.issue_instant)?;

        let mut document_verified = transport_signed;
        let mut certificates = Vec::new();
        if self.config.validate_signature || self.config.want_assertions_signed {
            certificates = self.signing_certificates().await?;
        }
        if self.config.validate_signature && doc.signed && !transport_signed {
            verify_enveloped(raw_xml, &certificates)?;
            document_verified = true;
        }

        self.check_status(&doc)?;
        self.check_issuer(doc.issuer.as_deref())?;

        if let Some(request_id) = expected_request_id {
            match doc.in_response_to.as_deref() {
                Some(in_response_to) if in_response_to == request_id => {}
                Some(in_response_to) => {
                    return Err(SamlError::ReplayOrCorrelation(format!(
                        "InResponseTo {in_response_to} does not match request {request_id}"
                    )))
                }
                None => {
                    return Err(SamlError::ReplayOrCorrelation(
                        "response carries no InResponseTo".to_string(),
                    ))
                }
            }
        }

        if self.config.want_assertions_encrypted && !doc.assertions.is_empty() {
            return Err(SamlError::EncryptionRequired);
        }

        let mut assertions = doc.assertions;
        for encrypted in &doc.encrypted_assertions {
            let plaintext = decrypt_element(encrypted, &self.key_store).await?;
            assertions.push(parse_assertion(&plaintext)?);
        }
        let assertion = assertions.into_iter().next().ok_or_else(|| {
            SamlError::InvalidDocument("response carries no assertion".to_string())
        })?;

        // A document-level signature covers plaintext assertions; an
        // uncovered assertion must carry (and pass) its own.
        let needs_own_signature = (self.config.validate_signature && !document_verified)
            || self.config.want_assertions_signed;
        if needs_own_signature {
            if !assertion.signed {
                return Err(SamlError::InvalidSignature(
                    "assertion is not signed".to_string(),
                ));
            }
            verify_enveloped(&assertion.raw_xml, &certificates)?;
        }

        self.check_issuer(assertion.issuer.as_deref())?;
        if let (Some(request_id), Some(confirmation)) = (
            expected_request_id,
            assertion.confirmation_in_response_to.as_deref(),
        ) {
            if confirmation != request_id {
                return Err(SamlError::ReplayOrCorrelation(format!(
                    "SubjectConfirmationData addresses request {confirmation}, expected {request_id}"
                )));
            }
        }
        self.check_conditions(&assertion)?;

        let name_id = match (&assertion.name_id, &assertion.encrypted_name_id) {
            (Some(name_id), _) => Some(name_id.clone()),
            (None, Some(encrypted)) => {
                let plaintext = decrypt_element(encrypted, &self.key_store).await?;
                Some(parse_name_id_fragment(&plaintext)?)
            }
            (None, None) => None,
        };

        let principal = self.extract_principal(&assertion, name_id.as_ref())?;
        let draft = self.build_draft(&assertion, name_id.as_ref(), &principal).await;

        info!(
            provider = %self.config.provider_alias,
            broker_user_id = %draft.broker_user_id,
            "SAML login verified"
        );
        Ok(draft)
    }

    async fn process_logout_request(
        &self,
        raw_xml: &str,
        doc: LogoutRequestDocument,
        transport_signed: bool,
    ) -> SamlResult<Vec<BrokerSession>> {
        self.check_destination(doc.destination.as_deref(), doc.signed || transport_signed)?;
        self.check_freshness(doc.issue_instant)?;

        if self.config.validate_signature && !transport_signed {
            if !doc.signed {
                return Err(SamlError::InvalidSignature(
                    "logout request is not signed".to_string(),
                ));
            }
            let certificates = self.signing_certificates().await?;
            verify_enveloped(raw_xml, &certificates)?;
        }

        self.check_issuer(doc.issuer.as_deref())?;

        let name_id = doc.name_id.ok_or_else(|| {
            SamlError::MissingPrincipal("logout request carries no NameID".to_string())
        })?;

        let mut terminated = Vec::new();
        if doc.session_indexes.is_empty() {
            terminated = self
                .sessions
                .begin_logout_for_principal(&self.config.provider_alias, &name_id.value)
                .await;
        } else {
            for index in &doc.session_indexes {
                if let Some(session) = self
                    .sessions
                    .begin_logout(&self.config.provider_alias, index)
                    .await
                {
                    terminated.push(session);
                }
            }
        }

        info!(
            provider = %self.config.provider_alias,
            sessions = terminated.len(),
            "SAML logout request processed"
        );
        Ok(terminated)
    }

    fn process_logout_response(&self, doc: StatusDocument) -> SamlResult<ProcessedMessage> {
        match doc.status_code.as_deref() {
            Some(STATUS_SUCCESS) | None => Ok(ProcessedMessage::LogoutAck {
                in_response_to: doc.in_response_to,
            }),
            Some(status) => Err(SamlError::RejectedStatus {
                status: status.to_string(),
                retryable: false,
            }),
        }
    }

    /// Static certificates merged with metadata-published ones. A
    /// metadata failure is fatal only when nothing static remains.
    async fn signing_certificates(&self) -> SamlResult<Vec<String>> {
        let mut certificates = self.config.idp_certificates.clone();
        if let Some(url) = &self.config.metadata_url {
            match self.metadata.get_descriptor(url).await {
                Ok(descriptor) => certificates.extend(descriptor.signing_certificates),
                Err(e) if certificates.is_empty() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "metadata fetch failed, using static certificates");
                }
            }
        }
        Ok(certificates)
    }

    fn check_destination(&self, destination: Option<&str>, signed: bool) -> SamlResult<()> {
        if !self.config.validate_destination {
            return Ok(());
        }
        match destination {
            Some(actual) => {
                if let Some(expected) = &self.config.expected_destination {
                    if actual != expected {
                        return Err(SamlError::InvalidDestination {
                            expected: expected.clone(),
                            actual: actual.to_string(),
                        });
                    }
                }
                Ok(())
            }
            // An unsigned document gets rejected later on the
            // signature requirement; a signed one hiding its
            // Destination is a redirect attack.
            None if signed => Err(SamlError::MissingDestination),
            None => Ok(()),
        }
    }

    fn check_freshness(&self, issue_instant: Option<DateTime<Utc>>) -> SamlResult<()> {
        let Some(instant) = issue_instant else {
            return Ok(());
        };
        let skew = Duration::seconds(self.config.clock_skew_secs);
        let now = Utc::now();
        if instant + skew < now {
            return Err(SamlError::StaleMessage(format!(
                "issued at {instant}, outside the freshness window"
            )));
        }
        if instant - skew > now {
            return Err(SamlError::StaleMessage(format!(
                "issued in the future at {instant}"
            )));
        }
        Ok(())
    }

    fn check_status(&self, doc: &ResponseDocument) -> SamlResult<()> {
        let status = doc.status_code.as_deref().unwrap_or("(missing)");
        if status == STATUS_SUCCESS {
            return Ok(());
        }
        // AuthnFailed means the IdP session expired or the user
        // cancelled; the login can be restarted.
        let retryable = status == STATUS_AUTHN_FAILED
            || doc.nested_status_code.as_deref() == Some(STATUS_AUTHN_FAILED);
        Err(SamlError::RejectedStatus {
            status: status.to_string(),
            retryable,
        })
    }

    fn check_issuer(&self, issuer: Option<&str>) -> SamlResult<()> {
        if let (Some(expected), Some(actual)) = (&self.config.idp_entity_id, issuer) {
            if actual != expected {
                return Err(SamlError::InvalidDocument(format!(
                    "issuer {actual} does not match the configured IdP {expected}"
                )));
            }
        }
        Ok(())
    }

    fn check_conditions(&self, assertion: &Assertion) -> SamlResult<()> {
        let skew = Duration::seconds(self.config.clock_skew_secs);
        let now = Utc::now();
        if let Some(not_before) = assertion.not_before {
            if not_before - skew > now {
                return Err(SamlError::ConditionsExpired(format!(
                    "assertion not valid before {not_before}"
                )));
            }
        }
        if let Some(not_on_or_after) = assertion.not_on_or_after {
            if not_on_or_after + skew <= now {
                return Err(SamlError::ConditionsExpired(format!(
                    "assertion expired at {not_on_or_after}"
                )));
            }
        }
        // The callback URL is an acceptable audience alongside the
        // entity id; some IdPs address assertions to the ACS endpoint.
        if !assertion.audiences.is_empty() {
            let accepted = assertion.audiences.iter().any(|a| {
                a == &self.config.entity_id
                    || self.config.expected_destination.as_deref() == Some(a)
            });
            if !accepted {
                return Err(SamlError::ConditionsExpired(format!(
                    "audience restriction excludes {}",
                    self.config.entity_id
                )));
            }
        }
        Ok(())
    }

    fn extract_principal(
        &self,
        assertion: &Assertion,
        name_id: Option<&NameId>,
    ) -> SamlResult<String> {
        let principal = match &self.config.principal_strategy {
            PrincipalStrategy::SubjectNameId => name_id.map(|n| n.value.clone()),
            PrincipalStrategy::Attribute(name) => {
                assertion.attribute_value(name).map(str::to_string)
            }
            PrincipalStrategy::FriendlyAttribute(friendly) => {
                assertion.friendly_attribute_value(friendly).map(str::to_string)
            }
        };
        principal.ok_or_else(|| {
            SamlError::MissingPrincipal(format!(
                "strategy {:?} produced no value",
                self.config.principal_strategy
            ))
        })
    }

    async fn build_draft(
        &self,
        assertion: &Assertion,
        name_id: Option<&NameId>,
        principal: &str,
    ) -> IdentityDraft {
        let alias = &self.config.provider_alias;
        let mut draft = IdentityDraft::new(principal, format!("{alias}.{principal}"));
        draft.username = Some(principal.to_string());

        draft.email = name_id
            .filter(|n| n.format.as_deref() == Some(NAMEID_FORMAT_EMAIL))
            .map(|n| n.value.clone())
            .or_else(|| assertion.attribute_value(EMAIL_ATTRIBUTE_OID).map(str::to_string));

        for attribute in &assertion.attributes {
            for value in &attribute.values {
                draft.add_attribute(&attribute.name, value);
            }
            if let Some(friendly) = &attribute.friendly_name {
                if friendly != &attribute.name {
                    for value in &attribute.values {
                        draft.add_attribute(friendly, value);
                    }
                }
            }
        }

        if let Some(index) = &assertion.session_index {
            draft.broker_session_id = Some(format!("{alias}.{index}"));
            self.sessions.register(alias, index, principal).await;
        }

        draft.assertion_xml = Some(assertion.raw_xml.clone());
        draft
    }
}

#[async_trait]
impl Verifier for SamlProcessor {
    type Error = SamlError;

    /// POST-binding login verification; `relay_state` carries the
    /// outstanding request id for SP-initiated flows.
    async fn verify(
        &self,
        raw: &str,
        relay_state: Option<&str>,
    ) -> Result<IdentityDraft, Self::Error> {
        match self.process_post(raw, relay_state).await? {
            ProcessedMessage::Login(draft) => Ok(draft),
            _ => Err(SamlError::InvalidDocument(
                "expected a login response".to_string(),
            )),
        }
    }
}

/// One-shot POST-binding verification.
pub async fn verify_saml_response(
    config: SamlProviderConfig,
    key_store: Arc<dyn KeyStore>,
    encoded: &str,
    expected_request_id: Option<&str>,
) -> SamlResult<IdentityDraft> {
    SamlProcessor::new(config, key_store)
        .verify(encoded, expected_request_id)
        .await
}

/// Parse a decrypted `EncryptedID` plaintext, a bare NameID element.
fn parse_name_id_fragment(xml: &str) -> SamlResult<NameId> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut format = None;
    let mut in_name_id = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"NameID" => {
                in_name_id = true;
                format = e.attributes().flatten().find_map(|a| {
                    (a.key.as_ref() == b"Format")
                        .then(|| a.unescape_value().unwrap_or_default().to_string())
                });
            }
            Ok(Event::Text(e)) if in_name_id => {
                return Ok(NameId {
                    value: e.unescape().unwrap_or_default().to_string(),
                    format,
                });
            }
            Ok(Event::Eof) => {
                return Err(SamlError::DecryptionFailed(
                    "decrypted subject is not a NameID".to_string(),
                ))
            }
            Err(e) => {
                return Err(SamlError::DecryptionFailed(format!("XML parse error: {e}")))
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::{encode_post, encode_redirect};
    use crate::crypto::encrypt_element;
    use crate::testutil::{sign_enveloped, TestIdp};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use idbridge_core::{InMemoryKeyStore, KeyEntry};
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;

    const SP_ENTITY_ID: &str = "https://sp.example.com";
    const IDP_ENTITY_ID: &str = "https://idp.example.com";
    const DESTINATION: &str = "https://sp.example.com/broker/endpoint";

    fn assertion_xml(now: &str) -> String {
        format!(
            concat!(
                "<saml:Assertion xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\" ",
                "ID=\"_a1\" Version=\"2.0\" IssueInstant=\"{now}\">",
                "<saml:Issuer>{idp}</saml:Issuer>",
                "<saml:Subject>",
                "<saml:NameID Format=\"urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress\">kim@example.com</saml:NameID>",
                "<saml:SubjectConfirmation Method=\"urn:oasis:names:tc:SAML:2.0:cm:bearer\">",
                "<saml:SubjectConfirmationData InResponseTo=\"_req1\" Recipient=\"{dest}\"/>",
                "</saml:SubjectConfirmation>",
                "</saml:Subject>",
                "<saml:Conditions NotBefore=\"2020-01-01T00:00:00Z\" NotOnOrAfter=\"2099-01-01T00:00:00Z\">",
                "<saml:AudienceRestriction><saml:Audience>{sp}</saml:Audience></saml:AudienceRestriction>",
                "</saml:Conditions>",
                "<saml:AuthnStatement SessionIndex=\"sess-42\"/>",
                "<saml:AttributeStatement>",
                "<saml:Attribute Name=\"uid\" FriendlyName=\"userid\">",
                "<saml:AttributeValue>u-123</saml:AttributeValue>",
                "</saml:Attribute>",
                "<saml:Attribute Name=\"role\">",
                "<saml:AttributeValue>admin</saml:AttributeValue>",
                "<saml:AttributeValue>user</saml:AttributeValue>",
                "</saml:Attribute>",
                "</saml:AttributeStatement>",
                "</saml:Assertion>"
            ),
            now = now,
            idp = IDP_ENTITY_ID,
            dest = DESTINATION,
            sp = SP_ENTITY_ID,
        )
    }

    fn response_xml(body: &str, now: &str, status: &str, nested: Option<&str>) -> String {
        let nested_xml = match nested {
            Some(code) => format!("<samlp:StatusCode Value=\"{code}\"/>"),
            None => String::new(),
        };
        format!(
            concat!(
                "<samlp:Response xmlns:samlp=\"urn:oasis:names:tc:SAML:2.0:protocol\" ",
                "xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\" ",
                "ID=\"_resp1\" InResponseTo=\"_req1\" Version=\"2.0\" ",
                "IssueInstant=\"{now}\" Destination=\"{dest}\">",
                "<saml:Issuer>{idp}</saml:Issuer>",
                "<samlp:Status><samlp:StatusCode Value=\"{status}\">{nested}</samlp:StatusCode></samlp:Status>",
                "{body}",
                "</samlp:Response>"
            ),
            now = now,
            dest = DESTINATION,
            idp = IDP_ENTITY_ID,
            status = status,
            nested = nested_xml,
            body = body,
        )
    }

    fn base_config(idp: &TestIdp) -> SamlProviderConfig {
        SamlProviderConfig::new("acme-idp", SP_ENTITY_ID)
            .idp_entity_id(IDP_ENTITY_ID)
            .expected_destination(DESTINATION)
            .idp_certificate(idp.certificate_pem.clone())
    }

    fn processor(config: SamlProviderConfig) -> SamlProcessor {
        SamlProcessor::new(config, Arc::new(InMemoryKeyStore::new()))
    }

    fn signed_response(idp: &TestIdp) -> String {
        let now = Utc::now().to_rfc3339();
        let xml = response_xml(&assertion_xml(&now), &now, STATUS_SUCCESS, None);
        sign_enveloped(idp, &xml, "_resp1")
    }

    #[tokio::test]
    async fn test_post_login_happy_path() {
        let idp = TestIdp::generate();
        let processor = processor(base_config(&idp));

        let message = processor
            .process_post(&encode_post(&signed_response(&idp)), Some("_req1"))
            .await
            .unwrap();
        let ProcessedMessage::Login(draft) = message else {
            panic!("expected a login");
        };

        assert_eq!(draft.subject, "kim@example.com");
        assert_eq!(draft.broker_user_id, "acme-idp.kim@example.com");
        assert_eq!(draft.broker_session_id.as_deref(), Some("acme-idp.sess-42"));
        assert_eq!(draft.username.as_deref(), Some("kim@example.com"));
        // Email from the email-format NameID.
        assert_eq!(draft.email.as_deref(), Some("kim@example.com"));
        assert_eq!(draft.attributes["role"], vec!["admin", "user"]);
        assert_eq!(draft.attributes["uid"], vec!["u-123"]);
        assert_eq!(draft.attributes["userid"], vec!["u-123"]);
        assert!(draft.assertion_xml.unwrap().starts_with("<saml:Assertion"));

        // The login registered a broker session.
        assert!(processor.sessions().get("acme-idp", "sess-42").await.is_some());
    }

    #[tokio::test]
    async fn test_idp_initiated_login_skips_correlation() {
        let idp = TestIdp::generate();
        let processor = processor(base_config(&idp));

        let message = processor
            .process_post(&encode_post(&signed_response(&idp)), None)
            .await
            .unwrap();
        assert!(matches!(message, ProcessedMessage::Login(_)));
    }

    #[tokio::test]
    async fn test_correlation_mismatch_rejected() {
        let idp = TestIdp::generate();
        let processor = processor(base_config(&idp));

        let err = processor
            .process_post(&encode_post(&signed_response(&idp)), Some("_other"))
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::ReplayOrCorrelation(_)));
    }

    #[tokio::test]
    async fn test_destination_mismatch_rejected() {
        let idp = TestIdp::generate();
        let config = base_config(&idp).expected_destination("https://elsewhere.example.com/acs");
        let processor = processor(config);

        let err = processor
            .process_post(&encode_post(&signed_response(&idp)), Some("_req1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::InvalidDestination { .. }));
    }

    #[tokio::test]
    async fn test_signed_response_without_destination_rejected() {
        let idp = TestIdp::generate();
        let now = Utc::now().to_rfc3339();
        let xml = format!(
            concat!(
                "<samlp:Response xmlns:samlp=\"urn:oasis:names:tc:SAML:2.0:protocol\" ",
                "xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\" ",
                "ID=\"_resp1\" Version=\"2.0\" IssueInstant=\"{now}\">",
                "<saml:Issuer>{idp}</saml:Issuer>",
                "<samlp:Status><samlp:StatusCode Value=\"{status}\"/></samlp:Status>",
                "{body}",
                "</samlp:Response>"
            ),
            now = now,
            idp = IDP_ENTITY_ID,
            status = STATUS_SUCCESS,
            body = assertion_xml(&now),
        );
        let signed = sign_enveloped(&idp, &xml, "_resp1");
        let processor = processor(base_config(&idp));

        let err = processor
            .process_post(&encode_post(&signed), Some("_req1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::MissingDestination));
    }

    #[tokio::test]
    async fn test_tampered_response_fails_signature() {
        let idp = TestIdp::generate();
        let tampered = signed_response(&idp).replace("kim@example.com", "eve@example.com");
        let processor = processor(base_config(&idp));

        let err = processor
            .process_post(&encode_post(&tampered), Some("_req1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::InvalidSignature(_)));
    }

    #[tokio::test]
    async fn test_authn_failed_status_is_retryable() {
        let idp = TestIdp::generate();
        let now = Utc::now().to_rfc3339();
        let xml = response_xml(
            "",
            &now,
            "urn:oasis:names:tc:SAML:2.0:status:Responder",
            Some(STATUS_AUTHN_FAILED),
        );
        let signed = sign_enveloped(&idp, &xml, "_resp1");
        let processor = processor(base_config(&idp));

        let err = processor
            .process_post(&encode_post(&signed), Some("_req1"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_stale_issue_instant_rejected() {
        let idp = TestIdp::generate();
        let stale = (Utc::now() - Duration::hours(2)).to_rfc3339();
        let fresh_conditions = Utc::now().to_rfc3339();
        let xml = response_xml(
            &assertion_xml(&fresh_conditions),
            &stale,
            STATUS_SUCCESS,
            None,
        );
        let signed = sign_enveloped(&idp, &xml, "_resp1");
        let processor = processor(base_config(&idp));

        let err = processor
            .process_post(&encode_post(&signed), Some("_req1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::StaleMessage(_)));
    }

    #[tokio::test]
    async fn test_audience_restriction_enforced() {
        let idp = TestIdp::generate();
        let config = SamlProviderConfig::new("acme-idp", "https://other-sp.example.com")
            .idp_entity_id(IDP_ENTITY_ID)
            .expected_destination(DESTINATION)
            .idp_certificate(idp.certificate_pem.clone());
        let processor = processor(config);

        let err = processor
            .process_post(&encode_post(&signed_response(&idp)), Some("_req1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::ConditionsExpired(_)));
    }

    #[tokio::test]
    async fn test_principal_attribute_strategy() {
        let idp = TestIdp::generate();
        let config =
            base_config(&idp).principal_strategy(PrincipalStrategy::Attribute("uid".to_string()));
        let processor = processor(config);

        let message = processor
            .process_post(&encode_post(&signed_response(&idp)), Some("_req1"))
            .await
            .unwrap();
        let ProcessedMessage::Login(draft) = message else {
            panic!("expected a login");
        };
        assert_eq!(draft.subject, "u-123");
        assert_eq!(draft.broker_user_id, "acme-idp.u-123");
    }

    #[tokio::test]
    async fn test_encrypted_assertion_decrypted_and_verified() {
        let idp = TestIdp::generate();
        let now = Utc::now().to_rfc3339();

        let rsa = Rsa::generate(2048).unwrap();
        let pkey = PKey::from_rsa(rsa).unwrap();
        let public_pem = String::from_utf8(pkey.public_key_to_pem().unwrap()).unwrap();
        let private_pem = String::from_utf8(pkey.private_key_to_pem_pkcs8().unwrap()).unwrap();
        let key_store = InMemoryKeyStore::new();
        key_store
            .add_key(KeyEntry::encryption("enc-1", "RSA-OAEP", &public_pem, &private_pem))
            .await;

        let encrypted = encrypt_element(
            &assertion_xml(&now),
            &public_pem,
            "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p",
            "http://www.w3.org/2001/04/xmlenc#aes128-cbc",
        )
        .unwrap();
        let body = format!(
            "<saml:EncryptedAssertion xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\">{encrypted}</saml:EncryptedAssertion>"
        );
        let xml = response_xml(&body, &now, STATUS_SUCCESS, None);
        let signed = sign_enveloped(&idp, &xml, "_resp1");

        let config = base_config(&idp).want_assertions_encrypted();
        let processor = SamlProcessor::new(config, Arc::new(key_store));

        let message = processor
            .process_post(&encode_post(&signed), Some("_req1"))
            .await
            .unwrap();
        let ProcessedMessage::Login(draft) = message else {
            panic!("expected a login");
        };
        assert_eq!(draft.subject, "kim@example.com");
    }

    #[tokio::test]
    async fn test_plaintext_assertion_rejected_when_encryption_required() {
        let idp = TestIdp::generate();
        let config = base_config(&idp).want_assertions_encrypted();
        let processor = processor(config);

        let err = processor
            .process_post(&encode_post(&signed_response(&idp)), Some("_req1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::EncryptionRequired));
    }

    #[tokio::test]
    async fn test_unsigned_assertion_rejected_when_required() {
        let idp = TestIdp::generate();
        // Document signature passes, but the assertion itself is not
        // signed.
        let config = base_config(&idp).want_assertions_signed();
        let processor = processor(config);

        let err = processor
            .process_post(&encode_post(&signed_response(&idp)), Some("_req1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::InvalidSignature(_)));
    }

    #[tokio::test]
    async fn test_redirect_login_with_query_signature() {
        let idp = TestIdp::generate();
        let now = Utc::now().to_rfc3339();
        // Redirect documents are unsigned; the query string carries
        // the signature instead.
        let xml = response_xml(&assertion_xml(&now), &now, STATUS_SUCCESS, None);

        let payload = urlencoding::encode(&encode_redirect(&xml)).to_string();
        let relay = urlencoding::encode("relay-1").to_string();
        let sig_alg =
            urlencoding::encode("http://www.w3.org/2001/04/xmldsig-more#rsa-sha256").to_string();
        let signed_data = format!("SAMLResponse={payload}&RelayState={relay}&SigAlg={sig_alg}");
        let signature = STANDARD.encode(idp.sign_sha256(signed_data.as_bytes()));

        let processor = processor(base_config(&idp));
        let message = processor
            .process_redirect(
                RedirectParams {
                    saml_response: &payload,
                    relay_state: Some(&relay),
                    sig_alg: Some(&sig_alg),
                    signature: Some(&signature),
                },
                Some("_req1"),
            )
            .await
            .unwrap();
        assert!(matches!(message, ProcessedMessage::Login(_)));
    }

    #[tokio::test]
    async fn test_unsigned_redirect_rejected() {
        let idp = TestIdp::generate();
        let now = Utc::now().to_rfc3339();
        let xml = response_xml(&assertion_xml(&now), &now, STATUS_SUCCESS, None);
        let payload = urlencoding::encode(&encode_redirect(&xml)).to_string();

        let processor = processor(base_config(&idp));
        let err = processor
            .process_redirect(
                RedirectParams {
                    saml_response: &payload,
                    relay_state: None,
                    sig_alg: None,
                    signature: None,
                },
                Some("_req1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::InvalidSignature(_)));
    }

    fn logout_request_xml(now: &str, session_index: &str) -> String {
        format!(
            concat!(
                "<samlp:LogoutRequest xmlns:samlp=\"urn:oasis:names:tc:SAML:2.0:protocol\" ",
                "xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\" ",
                "ID=\"_lr1\" Version=\"2.0\" IssueInstant=\"{now}\" Destination=\"{dest}\">",
                "<saml:Issuer>{idp}</saml:Issuer>",
                "<saml:NameID>kim@example.com</saml:NameID>",
                "<samlp:SessionIndex>{index}</samlp:SessionIndex>",
                "</samlp:LogoutRequest>"
            ),
            now = now,
            dest = DESTINATION,
            idp = IDP_ENTITY_ID,
            index = session_index,
        )
    }

    #[tokio::test]
    async fn test_logout_request_is_idempotent() {
        let idp = TestIdp::generate();
        let processor = processor(base_config(&idp));
        processor.sessions().register("acme-idp", "sess-42", "kim@example.com").await;

        let now = Utc::now().to_rfc3339();
        let signed = sign_enveloped(&idp, &logout_request_xml(&now, "sess-42"), "_lr1");
        let encoded = encode_post(&signed);

        let first = processor.process_post(&encoded, None).await.unwrap();
        let ProcessedMessage::Logout { terminated } = first else {
            panic!("expected a logout");
        };
        assert_eq!(terminated.len(), 1);
        assert_eq!(terminated[0].principal, "kim@example.com");

        // Replaying the same request terminates nothing and still
        // succeeds.
        let second = processor.process_post(&encoded, None).await.unwrap();
        let ProcessedMessage::Logout { terminated } = second else {
            panic!("expected a logout");
        };
        assert!(terminated.is_empty());
    }

    #[tokio::test]
    async fn test_unsigned_logout_request_rejected() {
        let idp = TestIdp::generate();
        let processor = processor(base_config(&idp));
        let now = Utc::now().to_rfc3339();

        let err = processor
            .process_post(&encode_post(&logout_request_xml(&now, "sess-42")), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::InvalidSignature(_)));
    }

    #[tokio::test]
    async fn test_logout_response_ack() {
        let idp = TestIdp::generate();
        let config = base_config(&idp).skip_signature_validation();
        let processor = processor(config);

        let xml = concat!(
            "<samlp:LogoutResponse xmlns:samlp=\"urn:oasis:names:tc:SAML:2.0:protocol\" ",
            "ID=\"_lresp1\" InResponseTo=\"_lr1\">",
            "<samlp:Status><samlp:StatusCode Value=\"urn:oasis:names:tc:SAML:2.0:status:Success\"/></samlp:Status>",
            "</samlp:LogoutResponse>"
        );
        let message = processor.process_post(&encode_post(xml), None).await.unwrap();
        let ProcessedMessage::LogoutAck { in_response_to } = message else {
            panic!("expected an ack");
        };
        assert_eq!(in_response_to.as_deref(), Some("_lr1"));
    }
}
