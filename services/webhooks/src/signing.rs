//! Delivery signatures.
//!
//! `X-Veganbase-Signature` is `base64(HMAC-SHA256(key = subscription secret, message = payload))`.
//! Only the raw `payload` JSON is signed, not the envelope around it.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

pub const SIGNATURE_HEADER: &str = "x-veganbase-signature";
pub const EVENT_TYPE_HEADER: &str = "x-veganbase-event-type";

type HmacSha256 = Hmac<Sha256>;

fn keyed(secret: &[u8]) -> HmacSha256 {
    match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    }
}

/// Sign `payload` with `secret`.
pub fn sign(payload: &[u8], secret: &[u8]) -> String {
    let mut mac = keyed(secret);
    mac.update(payload);
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Check a received signature in constant time.
pub fn verify_signature(payload: &[u8], secret: &[u8], signature: &str) -> bool {
    let Ok(signature) = STANDARD.decode(signature) else {
        return false;
    };
    let mut mac = keyed(secret);
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}
