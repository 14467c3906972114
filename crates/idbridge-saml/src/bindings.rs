//! HTTP binding payload decoding.

use std::io::Read;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::DeflateDecoder;

use crate::error::{SamlError, SamlResult};

/// Maximum encoded size for HTTP-POST payloads (512 KiB).
pub const MAX_ENCODED_SIZE_POST: usize = 512 * 1024;

/// Maximum encoded size for HTTP-Redirect payloads (128 KiB).
pub const MAX_ENCODED_SIZE_REDIRECT: usize = 128 * 1024;

/// Maximum decompressed size for deflate decoding (64 KiB) to prevent
/// deflate bomb DoS.
const MAX_DECOMPRESSED_SIZE: u64 = 64 * 1024;

/// Which HTTP binding delivered the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Form POST, base64 only, signature embedded in the document.
    Post,
    /// Redirect, base64 + raw DEFLATE, signature in the query string.
    Redirect,
}

/// Decode a binding payload into the raw XML document.
pub fn decode_payload(binding: Binding, encoded: &str) -> SamlResult<String> {
    match binding {
        Binding::Post => decode_post(encoded),
        Binding::Redirect => decode_redirect(encoded),
    }
}

fn decode_post(encoded: &str) -> SamlResult<String> {
    if encoded.len() > MAX_ENCODED_SIZE_POST {
        return Err(SamlError::PayloadTooLarge {
            size: encoded.len(),
            limit: MAX_ENCODED_SIZE_POST,
        });
    }
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|e| SamlError::InvalidDocument(format!("base64 decode failed: {e}")))?;
    String::from_utf8(decoded)
        .map_err(|e| SamlError::InvalidDocument(format!("document is not UTF-8: {e}")))
}

fn decode_redirect(encoded: &str) -> SamlResult<String> {
    if encoded.len() > MAX_ENCODED_SIZE_REDIRECT {
        return Err(SamlError::PayloadTooLarge {
            size: encoded.len(),
            limit: MAX_ENCODED_SIZE_REDIRECT,
        });
    }
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|e| SamlError::InvalidDocument(format!("base64 decode failed: {e}")))?;

    // Raw DEFLATE, capped so a crafted stream cannot balloon memory.
    let decoder = DeflateDecoder::new(&decoded[..]);
    let mut xml = String::new();
    decoder
        .take(MAX_DECOMPRESSED_SIZE)
        .read_to_string(&mut xml)
        .map_err(|e| SamlError::InvalidDocument(format!("deflate decode failed: {e}")))?;
    if xml.len() as u64 >= MAX_DECOMPRESSED_SIZE {
        return Err(SamlError::PayloadTooLarge {
            size: xml.len(),
            limit: MAX_DECOMPRESSED_SIZE as usize,
        });
    }
    Ok(xml)
}

/// Deflate-and-encode, used by tests and IdP-bound requests.
#[must_use]
pub fn encode_redirect(xml: &str) -> String {
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    // Writing to a Vec cannot fail.
    let _ = encoder.write_all(xml.as_bytes());
    let compressed = encoder.finish().unwrap_or_default();
    STANDARD.encode(compressed)
}

/// Base64-encode for the POST binding.
#[must_use]
pub fn encode_post(xml: &str) -> String {
    STANDARD.encode(xml.as_bytes())
}
