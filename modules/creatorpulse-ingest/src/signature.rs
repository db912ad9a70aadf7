//! Webhook signature validation: hex HMAC-SHA256 over the raw request body,
//! compared in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header the actor service signs its deliveries with.
pub const SIGNATURE_HEADER: &str = "apify-webhook-signature";

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign_payload(body: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a delivery. Length mismatch rejects outright; equal-length
/// buffers compare in constant time.
pub fn verify_signature(body: &[u8], signature_hex: &str, secret: &str) -> bool {
    let expected = sign_payload(body, secret);
    constant_time_eq(signature_hex.as_bytes(), expected.as_bytes())
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_validates() {
        let body = br#"{"eventType":"ACTOR.RUN.SUCCEEDED"}"#;
        let sig = sign_payload(body, "whsec_test");
        assert!(verify_signature(body, &sig, "whsec_test"));
    }

    #[test]
    fn any_single_byte_perturbation_fails() {
        let body = br#"{"eventType":"ACTOR.RUN.SUCCEEDED"}"#.to_vec();
        let sig = sign_payload(&body, "whsec_test");

        for i in 0..body.len() {
            let mut tampered = body.clone();
            tampered[i] ^= 0x01;
            assert!(
                !verify_signature(&tampered, &sig, "whsec_test"),
                "byte {i} flip should invalidate"
            );
        }
    }

    #[test]
    fn perturbed_signature_fails() {
        let body = b"payload";
        let sig = sign_payload(body, "whsec_test");
        let mut chars: Vec<char> = sig.chars().collect();
        chars[0] = if chars[0] == 'a' { 'b' } else { 'a' };
        let tampered: String = chars.into_iter().collect();
        assert!(!verify_signature(body, &tampered, "whsec_test"));
    }

    #[test]
    fn wrong_secret_fails() {
        let body = b"payload";
        let sig = sign_payload(body, "secret-a");
        assert!(!verify_signature(body, &sig, "secret-b"));
    }

    #[test]
    fn length_mismatch_rejected() {
        let body = b"payload";
        assert!(!verify_signature(body, "deadbeef", "whsec_test"));
        assert!(!verify_signature(body, "", "whsec_test"));
    }
}
