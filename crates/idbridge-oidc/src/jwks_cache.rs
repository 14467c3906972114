//! TTL-cached JWKS fetching.
//!
//! Provider JWKS endpoints are fetched at most once per TTL window;
//! verification paths go through [`JwksCache::find_signing_key`] so a
//! rotated `kid` only costs one refetch after expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::error::{OidcError, OidcResult};
use crate::jwks::{Jwk, JwkSet};

/// How long fetched key sets stay fresh.
pub const DEFAULT_JWKS_CACHE_TTL: Duration = Duration::from_secs(600);

/// Outbound request timeout for key-set fetches.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct CachedJwks {
    jwks: JwkSet,
    fetched_at: Instant,
}

/// Cache of remote key sets, keyed by endpoint URI.
#[derive(Debug, Clone)]
pub struct JwksCache {
    cache: Arc<RwLock<HashMap<String, CachedJwks>>>,
    ttl: Duration,
    http: reqwest::Client,
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new()
    }
}

impl JwksCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_JWKS_CACHE_TTL)
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

    /// Get the key set for `uri`, fetching if absent or stale.
    pub async fn get_keys(&self, uri: &str) -> OidcResult<JwkSet> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(uri) {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.jwks.clone());
                }
            }
        }
        self.get_keys_force_refresh(uri).await
    }

    /// Fetch the key set for `uri`, bypassing the cache.
    #[instrument(skip(self))]
    pub async fn get_keys_force_refresh(&self, uri: &str) -> OidcResult<JwkSet> {
        let jwks = self.fetch(uri).await?;
        debug!(keys = jwks.keys.len(), "fetched JWKS");

        let mut cache = self.cache.write().await;
        cache.insert(
            uri.to_string(),
            CachedJwks {
                jwks: jwks.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(jwks)
    }

    /// Find a key by `kid` in the (possibly cached) set for `uri`.
    pub async fn find_key(&self, uri: &str, kid: &str) -> OidcResult<Option<Jwk>> {
        let jwks = self.get_keys(uri).await?;
        Ok(jwks.find_key(kid).cloned())
    }

    /// Find a signature-verification key, rejecting keys whose
    /// declared use is not `sig`.
    pub async fn find_signing_key(&self, uri: &str, kid: Option<&str>) -> OidcResult<Option<Jwk>> {
        let jwks = self.get_keys(uri).await?;
        Ok(jwks.find_signing_key(kid).cloned())
    }

    /// Drop the cached set for one endpoint.
    pub async fn invalidate(&self, uri: &str) {
        self.cache.write().await.remove(uri);
    }

    /// Drop every cached set.
    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }

    async fn fetch(&self, uri: &str) -> OidcResult<JwkSet> {
        let response = self
            .http
            .get(uri)
            .send()
            .await
            .map_err(|e| OidcError::JwksFetch(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(OidcError::JwksFetch(format!(
                "endpoint returned status {}",
                response.status()
            )));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| OidcError::JwksFetch(format!("invalid JWKS body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn jwks_body(kid: &str) -> String {
        format!(
            r#"{{"keys":[{{"kty":"RSA","use":"sig","kid":"{kid}","alg":"RS256","n":"uOs2","e":"AQAB"}}]}}"#
        )
    }

    #[tokio::test]
    async fn test_fetch_and_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_string(jwks_body("key-1")))
            .expect(1)
            .mount(&server)
            .await;

        let cache = JwksCache::new();
        let uri = format!("{}/jwks", server.uri());

        let first = cache.get_keys(&uri).await.unwrap();
        assert_eq!(first.keys.len(), 1);

        // Second call is served from cache; the mock expects one hit.
        let second = cache.get_keys(&uri).await.unwrap();
        assert_eq!(second.keys[0].kid.as_deref(), Some("key-1"));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_string(jwks_body("key-1")))
            .expect(2)
            .mount(&server)
            .await;

        let cache = JwksCache::new();
        let uri = format!("{}/jwks", server.uri());

        cache.get_keys(&uri).await.unwrap();
        cache.invalidate(&uri).await;
        cache.get_keys(&uri).await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_error_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let cache = JwksCache::new();
        let uri = format!("{}/jwks", server.uri());

        let err = cache.get_keys(&uri).await.unwrap_err();
        assert!(matches!(err, OidcError::JwksFetch(_)));
    }

    #[tokio::test]
    async fn test_find_signing_key_skips_enc_keys() {
        let server = MockServer::start().await;
        let body = r#"{"keys":[
            {"kty":"RSA","use":"enc","kid":"enc-1","n":"uOs2","e":"AQAB"},
            {"kty":"RSA","use":"sig","kid":"sig-1","n":"uOs2","e":"AQAB"}
        ]}"#;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let cache = JwksCache::new();
        let uri = format!("{}/jwks", server.uri());

        let found = cache.find_signing_key(&uri, Some("enc-1")).await.unwrap();
        assert!(found.is_none());

        let found = cache.find_signing_key(&uri, None).await.unwrap();
        assert_eq!(found.unwrap().kid.as_deref(), Some("sig-1"));
    }
}
