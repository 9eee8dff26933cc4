//! ec_crypto — envelope and token cryptography for eClaims links
//!
//! # Design principles
//! - NO custom crypto; AES, PBKDF2 and HMAC come from the RustCrypto crates.
//! - The shared secret is zeroized on drop and never logged.
//! - Verification queries return `Option`; only encrypt/decrypt return errors.
//!
//! # Module layout
//! - `secret`      — shared secret newtype
//! - `kdf`         — PBKDF2 envelope key derivation, IV generation
//! - `mac`         — HMAC-SHA256 keyed signatures
//! - `encoding`    — URL-safe / standard / lenient base64
//! - `envelope`    — secure envelope codec + smart vehicle-data extraction
//! - `token`       — self-issued secure JWT create/verify
//! - `auth_token`  — normalized `AuthToken` and the multi-format parser
//! - `error`       — unified error type

pub mod auth_token;
pub mod encoding;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod mac;
pub mod secret;
pub mod token;

pub use auth_token::{AuthToken, TokenSource};
pub use envelope::{EnvelopeCodec, SecureEnvelope};
pub use error::CryptoError;
pub use secret::SharedSecret;
pub use token::{TokenCodec, TokenHeader, TokenRejection, VerifiedToken};

/// Wall clock in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
