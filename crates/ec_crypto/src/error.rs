use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Envelope expired: {age_ms} ms old, limit {max_age_ms} ms")]
    EnvelopeExpired { age_ms: i64, max_age_ms: i64 },

    #[error("Envelope signature mismatch (possible tampering)")]
    EnvelopeTampered,

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
