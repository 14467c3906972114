//! TTL-cached IdP metadata fetching.
//!
//! Signing certificates can come from static provider configuration or
//! from the IdP's published metadata document. The cache keeps one
//! parsed descriptor per metadata URL so certificate rotation at the
//! IdP only costs one refetch after expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use quick_xml::events::Event;
use quick_xml::Reader;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::error::{SamlError, SamlResult};

/// How long fetched descriptors stay fresh.
pub const DEFAULT_METADATA_CACHE_TTL: Duration = Duration::from_secs(600);

/// Outbound request timeout for metadata fetches.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// The parts of an IdP entity descriptor the broker consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdpDescriptor {
    /// The IdP `entityID`.
    pub entity_id: Option<String>,
    /// Base64 DER certificates from signing `KeyDescriptor`s (and
    /// use-less ones, which the standard treats as both uses).
    pub signing_certificates: Vec<String>,
    /// HTTP-Redirect or HTTP-POST SingleSignOnService location.
    pub single_sign_on_url: Option<String>,
    /// SingleLogoutService location.
    pub single_logout_url: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedDescriptor {
    descriptor: IdpDescriptor,
    fetched_at: Instant,
}

/// Cache of remote IdP descriptors, keyed by metadata URL.
#[derive(Debug, Clone)]
pub struct MetadataCache {
    cache: Arc<RwLock<HashMap<String, CachedDescriptor>>>,
    ttl: Duration,
    http: reqwest::Client,
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_METADATA_CACHE_TTL)
    }

    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            http,
        }
    }

    /// Get the descriptor for `url`, fetching if absent or stale.
    pub async fn get_descriptor(&self, url: &str) -> SamlResult<IdpDescriptor> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(url) {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.descriptor.clone());
                }
            }
        }
        self.get_descriptor_force_refresh(url).await
    }

    /// Fetch the descriptor for `url`, bypassing the cache.
    #[instrument(skip(self))]
    pub async fn get_descriptor_force_refresh(&self, url: &str) -> SamlResult<IdpDescriptor> {
        let body = self.fetch(url).await?;
        let descriptor = parse_descriptor(&body)?;
        debug!(
            certificates = descriptor.signing_certificates.len(),
            "fetched IdP metadata"
        );

        let mut cache = self.cache.write().await;
        cache.insert(
            url.to_string(),
            CachedDescriptor {
                descriptor: descriptor.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(descriptor)
    }

    /// Drop the cached descriptor for one URL.
    pub async fn invalidate(&self, url: &str) {
        self.cache.write().await.remove(url);
    }

    async fn fetch(&self, url: &str) -> SamlResult<String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| SamlError::MetadataFetch(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(SamlError::MetadataFetch(format!(
                "endpoint returned status {}",
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| SamlError::MetadataFetch(format!("unreadable body: {e}")))
    }
}

/// Parse an `EntityDescriptor` document into the broker's view.
pub fn parse_descriptor(xml: &str) -> SamlResult<IdpDescriptor> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut descriptor = IdpDescriptor::default();
    let mut key_use: Option<String> = None;
    let mut in_key_descriptor = false;
    let mut in_certificate = false;
    let mut certificate = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e) | Event::Empty(e)) => match e.local_name().as_ref() {
                b"EntityDescriptor" => {
                    descriptor.entity_id = attr_value(&e, b"entityID");
                }
                b"KeyDescriptor" => {
                    in_key_descriptor = true;
                    key_use = attr_value(&e, b"use");
                }
                b"X509Certificate" if in_key_descriptor => in_certificate = true,
                b"SingleSignOnService" => {
                    if descriptor.single_sign_on_url.is_none() {
                        descriptor.single_sign_on_url = attr_value(&e, b"Location");
                    }
                }
                b"SingleLogoutService" => {
                    if descriptor.single_logout_url.is_none() {
                        descriptor.single_logout_url = attr_value(&e, b"Location");
                    }
                }
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_certificate {
                    certificate.push_str(&e.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"X509Certificate" => {
                    if in_certificate {
                        // A missing `use` counts as signing per the
                        // metadata schema.
                        if key_use.as_deref().is_none_or(|u| u == "signing") {
                            let compact: String =
                                certificate.split_whitespace().collect();
                            if !compact.is_empty() {
                                descriptor.signing_certificates.push(compact);
                            }
                        }
                        certificate.clear();
                        in_certificate = false;
                    }
                }
                b"KeyDescriptor" => {
                    in_key_descriptor = false;
                    key_use = None;
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SamlError::MetadataFetch(format!("XML parse error: {e}")))
            }
            _ => {}
        }
    }

    Ok(descriptor)
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        (a.key.as_ref() == name).then(|| a.unescape_value().unwrap_or_default().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn metadata_body() -> &'static str {
        r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="https://idp.example.com/saml">
  <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data><ds:X509Certificate>
          MIICsDCCAZgCCQ
          DSIGNINGCERT
        </ds:X509Certificate></ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>
    <md:KeyDescriptor use="encryption">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data><ds:X509Certificate>ENCCERT</ds:X509Certificate></ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>
    <md:SingleLogoutService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="https://idp.example.com/slo"/>
    <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="https://idp.example.com/sso"/>
  </md:IDPSSODescriptor>
</md:EntityDescriptor>"#
    }

    #[test]
    fn test_parse_descriptor_extracts_signing_certs_only() {
        let descriptor = parse_descriptor(metadata_body()).unwrap();
        assert_eq!(
            descriptor.entity_id.as_deref(),
            Some("https://idp.example.com/saml")
        );
        assert_eq!(
            descriptor.signing_certificates,
            vec!["MIICsDCCAZgCCQDSIGNINGCERT".to_string()]
        );
        assert_eq!(
            descriptor.single_sign_on_url.as_deref(),
            Some("https://idp.example.com/sso")
        );
        assert_eq!(
            descriptor.single_logout_url.as_deref(),
            Some("https://idp.example.com/slo")
        );
    }

    #[test]
    fn test_useless_key_descriptor_counts_as_signing() {
        let xml = r#"<EntityDescriptor entityID="e">
            <IDPSSODescriptor>
              <KeyDescriptor><KeyInfo><X509Data><X509Certificate>BOTHCERT</X509Certificate></X509Data></KeyInfo></KeyDescriptor>
            </IDPSSODescriptor>
          </EntityDescriptor>"#;
        let descriptor = parse_descriptor(xml).unwrap();
        assert_eq!(descriptor.signing_certificates, vec!["BOTHCERT".to_string()]);
    }

    #[tokio::test]
    async fn test_fetch_and_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata"))
            .respond_with(ResponseTemplate::new(200).set_body_string(metadata_body()))
            .expect(1)
            .mount(&server)
            .await;

        let cache = MetadataCache::new();
        let url = format!("{}/metadata", server.uri());

        let first = cache.get_descriptor(&url).await.unwrap();
        assert_eq!(first.signing_certificates.len(), 1);

        // Served from cache; the mock expects one hit.
        let second = cache.get_descriptor(&url).await.unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_fetch_error_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let cache = MetadataCache::new();
        let url = format!("{}/metadata", server.uri());

        let err = cache.get_descriptor(&url).await.unwrap_err();
        assert!(matches!(err, SamlError::MetadataFetch(_)));
    }
}
