//! Cryptographic utilities for webhook verification.
//!
//! The payment provider signs `"{timestamp}:{rawBody}"` with a shared secret
//! and sends the result in a `ts=<unix-seconds>;h1=<hex-hmac-sha256>` header.
//! This module recomputes and compares that signature in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// A parsed webhook signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Unix-seconds timestamp the provider signed over.
    pub timestamp: i64,

    /// Hex-encoded HMAC-SHA256 signature.
    pub signature: String,
}

/// Parse a `ts=<unix-seconds>;h1=<hex>` signature header.
///
/// Returns `None` on any malformed input; callers treat that the same as a
/// missing header.
#[must_use]
pub fn parse_signature_header(header: &str) -> Option<SignatureHeader> {
    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(';') {
        let (key, value) = part.trim().split_once('=')?;
        match key {
            "ts" => timestamp = Some(value.parse::<i64>().ok()?),
            "h1" => signature = Some(value.to_string()),
            _ => {}
        }
    }

    Some(SignatureHeader {
        timestamp: timestamp?,
        signature: signature?,
    })
}

/// Compute HMAC-SHA256 and return the hex-encoded result.
///
/// # Panics
///
/// This function will never panic in practice. The `expect` call is guarded
/// by the invariant that HMAC-SHA256 accepts keys of any size per RFC 2104.
#[must_use]
pub fn hmac_sha256_hex(secret: &str, message: &str) -> String {
    // INVARIANT: HMAC-SHA256 accepts keys of any size per RFC 2104, so
    // `new_from_slice` only fails if the Hmac implementation is broken.
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC-SHA256 accepts any key size");
    mac.update(message.as_bytes());
    let result = mac.finalize();

    hex::encode(result.into_bytes())
}

/// Verify a webhook signature over `"{timestamp}:{body}"`.
#[must_use]
pub fn verify_signature(secret: &str, timestamp: i64, body: &str, signature: &str) -> bool {
    let expected = hmac_sha256_hex(secret, &format!("{timestamp}:{body}"));
    constant_time_eq(&expected, signature)
}

/// Constant-time string comparison to prevent timing attacks.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
