//! User-info endpoint client.

use std::time::Duration;

use tracing::{debug, instrument};

use crate::claims::ValidatedClaimSet;
use crate::decoder::JoseDecoder;
use crate::error::{OidcError, OidcResult};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches the provider's user-info document with a bearer token.
///
/// Providers answer either with plain JSON or, when they sign their
/// profile payloads, with a JWT (`application/jwt`). The JWT form runs
/// through the full decoder with the audience check relaxed, since
/// profile tokens are not addressed to our client id.
pub struct UserInfoClient {
    http: reqwest::Client,
}

impl Default for UserInfoClient {
    fn default() -> Self {
        Self::new()
    }
}

impl UserInfoClient {
    #[must_use]
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http }
    }

    #[instrument(skip(self, access_token, decoder))]
    pub async fn fetch(
        &self,
        url: &str,
        access_token: &str,
        decoder: &JoseDecoder,
    ) -> OidcResult<ValidatedClaimSet> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| OidcError::UserInfoFetch(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(OidcError::UserInfoFetch(format!(
                "endpoint returned status {}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| OidcError::UserInfoFetch(format!("unreadable body: {e}")))?;

        if content_type.starts_with("application/jwt") {
            debug!("user-info returned a signed JWT payload");
            decoder.decode_with_options(body.trim(), true, true).await
        } else {
            ValidatedClaimSet::from_slice(body.as_bytes())
                .map_err(|e| OidcError::UserInfoFetch(format!("invalid profile body: {e}")))
        }
    }
}
