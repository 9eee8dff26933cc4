//! Secure envelope: encrypted JSON payload passed between the master app
//! and this app inside link parameters and tokens.
//!
//! Wire format: URL-safe base64 (no padding) of
//!
//! ```json
//! {"ciphertext":"<base64 AES-256-CBC>","iv":"<hex 16 bytes>","timestamp":<ms>,"signature":"<hex HMAC>"}
//! ```
//!
//! The AES key is PBKDF2(shared secret, iv) and never travels. The signature
//! covers `ciphertext ‖ timestamp`; an envelope older than the freshness
//! window is rejected before anything is decrypted. There is no replay
//! cache: a captured envelope replays fine inside the window.

use std::time::Duration;

use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::encoding;
use crate::error::CryptoError;
use crate::kdf::{envelope_key, generate_iv, IV_LEN};
use crate::mac;
use crate::now_ms;
use crate::secret::SharedSecret;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

// ── Wire form ────────────────────────────────────────────────────────────────

/// Default freshness window: 5 minutes.
pub const DEFAULT_MAX_AGE_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureEnvelope {
    pub ciphertext: String,
    pub iv: String,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub signature: String,
}

impl SecureEnvelope {
    pub fn to_text(&self) -> Result<String, CryptoError> {
        let json =
            serde_json::to_vec(self).map_err(|e| CryptoError::EncodingFailed(e.to_string()))?;
        Ok(encoding::encode_url_safe(&json))
    }

    pub fn from_text(text: &str) -> Result<Self, CryptoError> {
        let bytes = encoding::decode_lenient(text)
            .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))
    }

    fn signed_parts(&self) -> [Vec<u8>; 2] {
        [
            self.ciphertext.as_bytes().to_vec(),
            self.timestamp.to_string().into_bytes(),
        ]
    }
}

// ── Codec ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    secret: SharedSecret,
    max_age_ms: i64,
}

impl EnvelopeCodec {
    pub fn new(secret: SharedSecret) -> Self {
        Self {
            secret,
            max_age_ms: DEFAULT_MAX_AGE_MS,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        self
    }

    pub fn max_age_ms(&self) -> i64 {
        self.max_age_ms
    }

    pub(crate) fn secret(&self) -> &SharedSecret {
        &self.secret
    }

    pub fn encrypt<T: Serialize + ?Sized>(&self, payload: &T) -> Result<String, CryptoError> {
        self.encrypt_at(payload, now_ms())
    }

    /// Seal `payload` with an explicit creation timestamp.
    pub fn encrypt_at<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        timestamp: i64,
    ) -> Result<String, CryptoError> {
        let plaintext =
            serde_json::to_vec(payload).map_err(|e| CryptoError::EncodingFailed(e.to_string()))?;

        let iv = generate_iv();
        let key = envelope_key(&self.secret, &iv);
        let ciphertext = Aes256CbcEnc::new_from_slices(&key[..], &iv)
            .map_err(|e| CryptoError::EncodingFailed(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(&plaintext);

        let mut envelope = SecureEnvelope {
            ciphertext: encoding::encode_standard(&ciphertext),
            iv: hex::encode(iv),
            timestamp,
            signature: String::new(),
        };
        let [ct, ts] = envelope.signed_parts();
        envelope.signature = mac::sign(&self.secret, &[ct.as_slice(), ts.as_slice()])?;
        envelope.to_text()
    }

    pub fn decrypt(&self, text: &str) -> Result<Value, CryptoError> {
        self.decrypt_at(text, now_ms())
    }

    /// Open an envelope, judging freshness against `now` (ms epoch).
    pub fn decrypt_at(&self, text: &str, now: i64) -> Result<Value, CryptoError> {
        let envelope = SecureEnvelope::from_text(text)?;

        let age_ms = now.saturating_sub(envelope.timestamp);
        if age_ms > self.max_age_ms {
            return Err(CryptoError::EnvelopeExpired {
                age_ms,
                max_age_ms: self.max_age_ms,
            });
        }

        let [ct, ts] = envelope.signed_parts();
        if !mac::verify(&self.secret, &[ct.as_slice(), ts.as_slice()], &envelope.signature) {
            return Err(CryptoError::EnvelopeTampered);
        }

        let iv = hex::decode(&envelope.iv)
            .map_err(|e| CryptoError::DecryptionFailed(format!("iv: {e}")))?;
        if iv.len() != IV_LEN {
            return Err(CryptoError::DecryptionFailed(format!(
                "iv must be {IV_LEN} bytes, got {}",
                iv.len()
            )));
        }
        let ciphertext = encoding::decode_standard(&envelope.ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(format!("ciphertext: {e}")))?;

        let key = envelope_key(&self.secret, &iv);
        let plaintext = Aes256CbcDec::new_from_slices(&key[..], &iv)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed("padding rejected".into()))?;

        let json = String::from_utf8(plaintext)
            .map_err(|_| CryptoError::DecryptionFailed("plaintext is not UTF-8".into()))?;
        serde_json::from_str(&json).map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }

    /// Wrapper-only check used to tell envelopes from legacy base64 JSON.
    /// Nothing is decrypted.
    pub fn is_encrypted_envelope(text: &str) -> bool {
        let Ok(bytes) = encoding::decode_lenient(text) else {
            return false;
        };
        let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(&bytes) else {
            return false;
        };
        map.get("ciphertext").is_some_and(Value::is_string)
            && map.get("iv").is_some_and(Value::is_string)
            && map.get("timestamp").is_some_and(Value::is_number)
            && map.get("signature").is_some_and(Value::is_string)
    }

    /// Decode vehicle data in either the encrypted or the legacy form.
    /// Never fails: any problem is logged and yields `None`.
    pub fn smart_extract_vehicle_data(&self, text: &str) -> Option<Value> {
        if Self::is_encrypted_envelope(text) {
            debug!("vehicle data is an encrypted envelope");
            match self.decrypt(text) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(error = %err, "encrypted vehicle data rejected");
                    None
                }
            }
        } else {
            debug!("vehicle data treated as legacy base64");
            match decode_legacy(text) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(error = %err, "legacy vehicle data could not be decoded");
                    None
                }
            }
        }
    }
}

// ── Legacy base64 ────────────────────────────────────────────────────────────

/// Legacy plain form: standard base64 of the JSON text.
pub fn encode_legacy<T: Serialize + ?Sized>(payload: &T) -> Result<String, CryptoError> {
    let json =
        serde_json::to_vec(payload).map_err(|e| CryptoError::EncodingFailed(e.to_string()))?;
    Ok(encoding::encode_standard(&json))
}

pub fn decode_legacy(text: &str) -> Result<Value, CryptoError> {
    let bytes = encoding::decode_lenient(text)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codec() -> EnvelopeCodec {
        EnvelopeCodec::new(SharedSecret::from("master-app-shared-secret"))
    }

    fn vehicle() -> Value {
        json!({
            "id": "veh-001",
            "licensePlate": "AB-123-CD",
            "brand": "Renault",
            "model": "Clio",
            "owner": {"name": "Jeanne Martin", "policy": "POL-77"},
            "photos": [],
        })
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let codec = codec();
        for payload in [vehicle(), json!("plain string"), json!([1, 2, 3]), json!(null)] {
            let text = codec.encrypt(&payload).unwrap();
            assert_eq!(codec.decrypt(&text).unwrap(), payload);
        }
    }

    #[test]
    fn envelope_text_is_url_safe() {
        let text = codec().encrypt(&vehicle()).unwrap();
        assert!(text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn same_payload_gets_fresh_iv() {
        let codec = codec();
        let a = SecureEnvelope::from_text(&codec.encrypt(&vehicle()).unwrap()).unwrap();
        let b = SecureEnvelope::from_text(&codec.encrypt(&vehicle()).unwrap()).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn six_minute_old_envelope_is_expired() {
        let codec = codec();
        let now = now_ms();
        let text = codec.encrypt_at(&vehicle(), now - 6 * 60 * 1000).unwrap();
        let err = codec.decrypt_at(&text, now).unwrap_err();
        assert!(matches!(err, CryptoError::EnvelopeExpired { .. }));
    }

    #[test]
    fn four_minute_old_envelope_is_fresh() {
        let codec = codec();
        let now = now_ms();
        let text = codec.encrypt_at(&vehicle(), now - 4 * 60 * 1000).unwrap();
        assert_eq!(codec.decrypt_at(&text, now).unwrap(), vehicle());
    }

    #[test]
    fn custom_max_age_is_honoured() {
        let codec = codec().with_max_age(Duration::from_secs(10));
        let now = now_ms();
        let text = codec.encrypt_at(&vehicle(), now - 11_000).unwrap();
        assert!(matches!(
            codec.decrypt_at(&text, now),
            Err(CryptoError::EnvelopeExpired { max_age_ms: 10_000, .. })
        ));
    }

    #[test]
    fn flipped_ciphertext_is_detected() {
        let codec = codec();
        let text = codec.encrypt(&vehicle()).unwrap();
        let original = SecureEnvelope::from_text(&text).unwrap();

        for index in [0, original.ciphertext.len() / 2, original.ciphertext.len() - 3] {
            let mut tampered = original.clone();
            let mut chars: Vec<char> = tampered.ciphertext.chars().collect();
            chars[index] = if chars[index] == 'A' { 'B' } else { 'A' };
            tampered.ciphertext = chars.into_iter().collect();

            let err = codec.decrypt(&tampered.to_text().unwrap()).unwrap_err();
            assert!(
                matches!(
                    err,
                    CryptoError::EnvelopeTampered | CryptoError::DecryptionFailed(_)
                ),
                "unexpected error {err:?}"
            );
        }
    }

    #[test]
    fn rewritten_timestamp_is_detected() {
        let codec = codec();
        let mut envelope =
            SecureEnvelope::from_text(&codec.encrypt(&vehicle()).unwrap()).unwrap();
        envelope.timestamp += 1;
        let err = codec.decrypt(&envelope.to_text().unwrap()).unwrap_err();
        assert!(matches!(err, CryptoError::EnvelopeTampered));
    }

    #[test]
    fn other_secret_cannot_open() {
        let text = codec().encrypt(&vehicle()).unwrap();
        let other = EnvelopeCodec::new(SharedSecret::from("another-secret"));
        assert!(matches!(
            other.decrypt(&text),
            Err(CryptoError::EnvelopeTampered)
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            codec().decrypt("definitely not an envelope"),
            Err(CryptoError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn envelope_detection() {
        let codec = codec();
        assert!(EnvelopeCodec::is_encrypted_envelope(
            &codec.encrypt(&vehicle()).unwrap()
        ));
        assert!(!EnvelopeCodec::is_encrypted_envelope(
            &encode_legacy(&vehicle()).unwrap()
        ));
        let partial = encoding::encode_url_safe(br#"{"ciphertext":"x","iv":"y","timestamp":1}"#);
        assert!(!EnvelopeCodec::is_encrypted_envelope(&partial));
        assert!(!EnvelopeCodec::is_encrypted_envelope(""));
    }

    #[test]
    fn smart_extraction_handles_both_forms() {
        let codec = codec();
        let encrypted = codec.encrypt(&vehicle()).unwrap();
        let legacy = encode_legacy(&vehicle()).unwrap();

        assert_eq!(codec.smart_extract_vehicle_data(&encrypted), Some(vehicle()));
        assert_eq!(codec.smart_extract_vehicle_data(&legacy), Some(vehicle()));
    }

    #[test]
    fn smart_extraction_swallows_failures() {
        let codec = codec();
        let stale = codec
            .encrypt_at(&vehicle(), now_ms() - 10 * 60 * 1000)
            .unwrap();
        assert_eq!(codec.smart_extract_vehicle_data(&stale), None);
        assert_eq!(codec.smart_extract_vehicle_data("%%%not base64%%%"), None);
        assert_eq!(codec.smart_extract_vehicle_data(""), None);
    }
}
