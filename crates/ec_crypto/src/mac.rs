//! Keyed signatures (HMAC-SHA256, hex encoded).
//!
//! Used for envelope signatures (`ciphertext ‖ timestamp`) and for the
//! third segment of self-issued tokens.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::CryptoError;
use crate::secret::SharedSecret;

type HmacSha256 = Hmac<Sha256>;

fn keyed(secret: &SharedSecret, parts: &[&[u8]]) -> Result<HmacSha256, CryptoError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac)
}

/// Sign the concatenation of `parts`, returning lowercase hex.
pub fn sign(secret: &SharedSecret, parts: &[&[u8]]) -> Result<String, CryptoError> {
    let mac = keyed(secret, parts)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature. Undecodable hex is a mismatch.
pub fn verify(secret: &SharedSecret, parts: &[&[u8]], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    match keyed(secret, parts) {
        Ok(mac) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}
