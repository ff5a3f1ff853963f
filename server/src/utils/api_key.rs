//! API key generation and hashing utilities
//!
//! Keys are never compared directly: both the configured keys and the
//! presented key are reduced to HMAC-SHA256 digests under a per-process
//! secret and the digests are compared in constant time.

use axum::http::HeaderMap;
use axum::http::header;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use rand::Rng;
use rand::rngs::OsRng;
use sha2::Sha256;

use crate::core::constants::{API_KEY_HEADER, API_KEY_PREFIX, API_KEY_RANDOM_LENGTH};

type HmacSha256 = Hmac<Sha256>;

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate opaque API key: arb-{random_40chars}
/// Uses OsRng (CSPRNG)
pub fn generate_api_key() -> String {
    let random: String = (0..API_KEY_RANDOM_LENGTH)
        .map(|_| CHARSET[OsRng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("{}{}", API_KEY_PREFIX, random)
}

/// HMAC-SHA256 of key with server secret (hex encoded)
pub fn hash_api_key(key: &str, server_secret: &[u8]) -> Result<String, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(server_secret)?;
    mac.update(key.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Pull the presented key from `X-API-KEY`, falling back to `Authorization: Bearer`
pub fn extract_key(headers: &HeaderMap) -> Option<String> {
    let from_header = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty());
    if let Some(key) = from_header {
        return Some(key.to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}
