//! Envelope key derivation.
//!
//! PBKDF2-HMAC-SHA256 over the shared secret, salted with the per-envelope
//! IV. Both parties re-derive the key; it never travels.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::secret::SharedSecret;

/// Fixed iteration count shared with the master app.
pub const ENVELOPE_KDF_ROUNDS: u32 = 1000;
pub const ENVELOPE_KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;

/// Derive the 32-byte AES key for one envelope. Zeroized on drop.
pub fn envelope_key(secret: &SharedSecret, iv: &[u8]) -> Zeroizing<[u8; ENVELOPE_KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; ENVELOPE_KEY_LEN]);
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), iv, ENVELOPE_KDF_ROUNDS, &mut key[..]);
    key
}

/// Fresh random 128-bit IV (never reused).
pub fn generate_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}
