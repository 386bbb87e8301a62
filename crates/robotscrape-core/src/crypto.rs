//! Hashing, HMAC signing, and constant-time comparison helpers shared by
//! auth, caching, idempotency, and webhook delivery.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded SHA-256 digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// HMAC-SHA256 over `body` keyed by `secret`, hex-encoded.
pub fn hmac_sha256_hex(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of two hex-encoded digests, avoiding a timing
/// side-channel on key length or content.
pub fn constant_time_hex_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Verify an HMAC-SHA256 signature against a body without ever comparing
/// the raw secret to anything.
pub fn verify_hmac_sha256_hex(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    if signature_hex.len() != 64 {
        return false;
    }
    let expected = hmac_sha256_hex(secret, body);
    constant_time_hex_eq(&expected, signature_hex)
}

/// A random, URL-safe opaque token suitable for API keys.
pub fn random_token(prefix: &str) -> String {
    let raw = uuid::Uuid::new_v4();
    format!("{prefix}_{}", raw.simple())
}
