//! Signing and comparison helpers for webhook payloads and API keys.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex-encoded HMAC-SHA256 of `message` under `secret`.
///
/// Returns `None` only if the MAC rejects the key, which HMAC-SHA256 never
/// does for any key length.
#[must_use]
pub fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(message);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Header value for a signed payload: `t=<unix seconds>,v1=<hex mac>`.
///
/// The MAC covers `"{timestamp}.{body}"` so a receiver can reject replays.
#[must_use]
pub fn signature_header(secret: &str, timestamp: i64, body: &[u8]) -> Option<String> {
    let mut signed = format!("{timestamp}.").into_bytes();
    signed.extend_from_slice(body);
    let mac = hmac_sha256_hex(secret.as_bytes(), &signed)?;
    Some(format!("t={timestamp},v1={mac}"))
}

/// Check a `t=...,v1=...` header against `body`.
#[must_use]
pub fn verify_signature_header(secret: &str, header: &str, body: &[u8]) -> bool {
    let mut timestamp = None;
    let mut mac = None;
    for part in header.split(',') {
        match part.split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => mac = Some(value),
            _ => {}
        }
    }

    let (Some(timestamp), Some(mac)) = (timestamp, mac) else {
        return false;
    };
    signature_header(secret, timestamp, body)
        .is_some_and(|expected| constant_time_eq(&expected, &format!("t={timestamp},v1={mac}")))
}

/// Compare two strings without short-circuiting on the first differing byte.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_is_hex_sha256() {
        let mac = hmac_sha256_hex(b"key", b"The quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(
            mac,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn signature_header_round_trips() {
        let body = br#"{"event":"charged"}"#;
        let header = signature_header("whsec", 1_700_000_000, body).unwrap();

        assert!(header.starts_with("t=1700000000,v1="));
        assert!(verify_signature_header("whsec", &header, body));
        assert!(!verify_signature_header("other", &header, body));
        assert!(!verify_signature_header("whsec", &header, b"tampered"));
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert!(!verify_signature_header("whsec", "", b"{}"));
        assert!(!verify_signature_header("whsec", "v1=abc", b"{}"));
        assert!(!verify_signature_header("whsec", "t=abc,v1=abc", b"{}"));
    }

    #[test]
    fn constant_time_eq_compares_content_and_length() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(constant_time_eq("", ""));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
        assert!(!constant_time_eq("abc", "ABC"));
    }
}
