//! GitHub webhook signature verification.
//!
//! GitHub signs each delivery with HMAC-SHA256 over the raw request body and
//! sends the result in `x-hub-signature-256` as `sha256=<hex digest>`.
//! Reference: https://docs.github.com/en/webhooks/using-webhooks/validating-webhook-deliveries

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Algorithm tag GitHub puts in front of the hex digest.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Verify a GitHub webhook signature against the raw payload bytes.
///
/// The digest comparison goes through [`Mac::verify_slice`], which is
/// constant-time with respect to the position of the first mismatch.
///
/// # Returns
///
/// `true` only if `signature` is exactly `sha256=` followed by the hex
/// HMAC-SHA256 of `payload` under `secret`. Missing, unprefixed, non-hex or
/// wrong-length signatures all yield `false`.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    if secret.is_empty() || signature.is_empty() {
        warn!(
            has_secret = !secret.is_empty(),
            has_signature = !signature.is_empty(),
            "github_signature_missing_fields"
        );
        return false;
    }

    let Some(digest_hex) = signature.strip_prefix(SIGNATURE_PREFIX) else {
        warn!(signature_length = signature.len(), "github_signature_unprefixed");
        return false;
    };

    let presented = match hex::decode(digest_hex) {
        Ok(bytes) => bytes,
        Err(_) => {
            warn!(signature_length = signature.len(), "github_signature_not_hex");
            return false;
        }
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            warn!("github_signature_invalid_key");
            return false;
        }
    };
    mac.update(payload);

    // Also rejects digests of the wrong length
    let valid = mac.verify_slice(&presented).is_ok();

    if !valid {
        warn!(
            payload_length = payload.len(),
            digest_length = presented.len(),
            "github_signature_mismatch"
        );
    }

    valid
}

/// Compute the `x-hub-signature-256` header value for a payload.
#[cfg(test)]
pub(crate) fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(payload);
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "It's a Secret to Everybody";
    const PAYLOAD: &[u8] = b"Hello, World!";

    #[test]
    fn test_known_github_vector() {
        // Example delivery from GitHub's documentation
        let expected = "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17";
        assert_eq!(sign_payload(SECRET, PAYLOAD), expected);
        assert!(verify_signature(SECRET, PAYLOAD, expected));
    }

    #[test]
    fn test_verify_signature_valid() {
        let payload = br#"{"action":"opened","number":1}"#;
        let signature = sign_payload("webhook-secret", payload);
        assert!(verify_signature("webhook-secret", payload, &signature));
    }

    #[test]
    fn test_verify_signature_wrong_payload_or_secret() {
        let signature = sign_payload(SECRET, PAYLOAD);
        assert!(!verify_signature(SECRET, b"Hello, World?", &signature));
        assert!(!verify_signature("another secret", PAYLOAD, &signature));
    }

    #[test]
    fn test_verify_signature_is_byte_exact() {
        let original = br#"{"a": 1}"#;
        let reserialized = br#"{"a":1}"#;
        let signature = sign_payload(SECRET, original);
        assert!(!verify_signature(SECRET, reserialized, &signature));
    }

    #[test]
    fn test_verify_signature_missing_fields() {
        let signature = sign_payload(SECRET, PAYLOAD);
        assert!(!verify_signature("", PAYLOAD, &signature));
        assert!(!verify_signature(SECRET, PAYLOAD, ""));
    }

    #[test]
    fn test_verify_signature_malformed() {
        let signature = sign_payload(SECRET, PAYLOAD);
        let bare_hex = signature.trim_start_matches(SIGNATURE_PREFIX);

        assert!(!verify_signature(SECRET, PAYLOAD, bare_hex));
        assert!(!verify_signature(SECRET, PAYLOAD, &format!("sha1={}", bare_hex)));
        assert!(!verify_signature(SECRET, PAYLOAD, "sha256=not-hex-at-all"));
        assert!(!verify_signature(SECRET, PAYLOAD, "sha256="));
        // Truncated and extended digests
        assert!(!verify_signature(SECRET, PAYLOAD, &signature[..signature.len() - 2]));
        assert!(!verify_signature(SECRET, PAYLOAD, &format!("{}00", signature)));
    }
}
