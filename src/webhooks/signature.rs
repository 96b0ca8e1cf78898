//! Webhook payload signing.
//!
//! The signature is HMAC-SHA256 over the exact serialized body, sent as
//! `X-OpenPayFlow-Signature: sha256=<hex>`. Receivers recompute and compare
//! timing-safe.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_PREFIX: &str = "sha256=";

pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC-SHA256 accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

pub fn signature_header(secret: &str, body: &[u8]) -> String {
    format!("{}{}", SIGNATURE_PREFIX, sign(secret, body))
}

/// Receiver-side verification: recompute over the raw body and compare in
/// constant time against the hex after the `sha256=` prefix.
pub fn verify(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let Some(received_hex) = signature_header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(received) = hex::decode(received_hex) else {
        return false;
    };
    let Ok(expected) = hex::decode(sign(secret, body)) else {
        return false;
    };
    if received.len() != expected.len() {
        return false;
    }

    let mut diff = 0u8;
    for (a, b) in received.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}
