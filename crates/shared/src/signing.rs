use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

pub const WEBHOOK_ID_HEADER: &str = "x-webhook-id";
pub const WEBHOOK_SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const WEBHOOK_EVENT_HEADER: &str = "x-webhook-event";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigningError {
    #[error("webhook secret cannot be used as an HMAC key")]
    InvalidKey,
}

/// Hex-encoded HMAC-SHA256 of the exact request body bytes.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, SigningError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| SigningError::InvalidKey)?;
    mac.update(body);

    let digest = mac.finalize().into_bytes();
    Ok(to_lower_hex(digest.as_slice()))
}

pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    match sign_payload(secret, body) {
        Ok(expected) => constant_time_eq(&expected, signature.trim()),
        Err(_) => false,
    }
}

pub fn constant_time_eq(left: &str, right: &str) -> bool {
    if left.len() != right.len() {
        return false;
    }

    let mut diff = 0_u8;
    for (lhs, rhs) in left.as_bytes().iter().zip(right.as_bytes().iter()) {
        diff |= lhs ^ rhs;
    }

    diff == 0
}

fn to_lower_hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}
