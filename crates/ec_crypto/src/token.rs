//! Self-issued "secure JWT" tokens.
//!
//! Shape: `<envelope(header)>.<envelope(payload)>.<hex HMAC>`. Header and
//! payload are sealed independently with the envelope codec, and the HMAC
//! covers the first two segments joined by `.`. Envelope text never
//! contains a `.`, so splitting is unambiguous.
//!
//! Each segment also carries the envelope freshness window, so a token is
//! only accepted while both its `exp` claim and the envelope age allow it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::envelope::EnvelopeCodec;
use crate::error::CryptoError;
use crate::mac;
use crate::now_ms;

pub const TOKEN_TYPE: &str = "SEJWT";
pub const TOKEN_ALG: &str = "AES256-CBC+HS256";
pub const DEFAULT_ISSUER: &str = "eclaims-link";

const MS_PER_HOUR: f64 = 3_600_000.0;

// ── Token parts ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    pub typ: String,
    pub created: i64,
}

/// Header and claims of a token that passed every check.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedToken {
    pub header: TokenHeader,
    pub payload: Map<String, Value>,
}

impl VerifiedToken {
    /// `userId`, falling back to `sub`.
    pub fn user_id(&self) -> Option<&str> {
        self.payload
            .get("userId")
            .or_else(|| self.payload.get("sub"))
            .and_then(Value::as_str)
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.payload.get("exp").and_then(as_millis)
    }

    pub fn scope(&self) -> Vec<String> {
        self.payload.get("scope").map(split_scope).unwrap_or_default()
    }
}

/// Why a token failed verification. Only surfaced through
/// [`TokenCodec::inspect_token`]; `verify_token` collapses it to `None`.
#[derive(Debug, Error)]
pub enum TokenRejection {
    #[error("token must have 3 segments, found {0}")]
    Shape(usize),
    #[error("token signature mismatch")]
    BadSignature,
    #[error("token segment could not be opened: {0}")]
    Envelope(#[from] CryptoError),
    #[error("token header invalid: {0}")]
    Header(String),
    #[error("token payload is not a JSON object")]
    Payload,
    #[error("token expired at {exp}")]
    Expired { exp: i64 },
}

// ── Create / verify ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TokenCodec {
    envelope: EnvelopeCodec,
    issuer: String,
    pub(crate) external_issuers: Vec<String>,
}

impl TokenCodec {
    pub fn new(envelope: EnvelopeCodec) -> Self {
        Self {
            envelope,
            issuer: DEFAULT_ISSUER.to_string(),
            external_issuers: crate::auth_token::default_external_issuers(),
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    /// Issuer substrings recognised as an external identity provider.
    pub fn with_external_issuers(mut self, patterns: Vec<String>) -> Self {
        self.external_issuers = patterns;
        self
    }

    pub fn envelope(&self) -> &EnvelopeCodec {
        &self.envelope
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn create_token(
        &self,
        payload: &Map<String, Value>,
        expiration_hours: f64,
    ) -> Result<String, CryptoError> {
        self.create_token_at(payload, expiration_hours, now_ms())
    }

    pub fn create_token_at(
        &self,
        payload: &Map<String, Value>,
        expiration_hours: f64,
        now: i64,
    ) -> Result<String, CryptoError> {
        let header = TokenHeader {
            alg: TOKEN_ALG.to_string(),
            typ: TOKEN_TYPE.to_string(),
            created: now,
        };

        let mut full = payload.clone();
        let lifetime_ms = (expiration_hours * MS_PER_HOUR).round() as i64;
        full.insert("exp".into(), Value::from(now.saturating_add(lifetime_ms)));
        full.insert("iat".into(), Value::from(now));
        full.insert("iss".into(), Value::from(self.issuer.clone()));

        let enc_header = self.envelope.encrypt_at(&header, now)?;
        let enc_payload = self.envelope.encrypt_at(&full, now)?;
        let signing_input = format!("{enc_header}.{enc_payload}");
        let sig = mac::sign(self.envelope.secret(), &[signing_input.as_bytes()])?;

        Ok(format!("{signing_input}.{sig}"))
    }

    /// `None` on any failure; this is a query, not an assertion.
    pub fn verify_token(&self, token: &str) -> Option<VerifiedToken> {
        self.verify_token_at(token, now_ms())
    }

    pub fn verify_token_at(&self, token: &str, now: i64) -> Option<VerifiedToken> {
        match self.inspect_token_at(token, now) {
            Ok(verified) => Some(verified),
            Err(reason) => {
                debug!(%reason, "self-issued token not verified");
                None
            }
        }
    }

    pub fn inspect_token(&self, token: &str) -> Result<VerifiedToken, TokenRejection> {
        self.inspect_token_at(token, now_ms())
    }

    pub fn inspect_token_at(&self, token: &str, now: i64) -> Result<VerifiedToken, TokenRejection> {
        let parts: Vec<&str> = token.trim().split('.').collect();
        let [enc_header, enc_payload, sig] = parts.as_slice() else {
            return Err(TokenRejection::Shape(parts.len()));
        };

        let signing_input = format!("{enc_header}.{enc_payload}");
        if !mac::verify(self.envelope.secret(), &[signing_input.as_bytes()], sig) {
            return Err(TokenRejection::BadSignature);
        }

        let header_value = self.envelope.decrypt_at(enc_header, now)?;
        let payload_value = self.envelope.decrypt_at(enc_payload, now)?;

        let header: TokenHeader = serde_json::from_value(header_value)
            .map_err(|e| TokenRejection::Header(e.to_string()))?;
        let Value::Object(payload) = payload_value else {
            return Err(TokenRejection::Payload);
        };

        if let Some(exp) = payload.get("exp").and_then(as_millis) {
            if now > exp {
                return Err(TokenRejection::Expired { exp });
            }
        }

        Ok(VerifiedToken { header, payload })
    }
}

// ── Claim helpers ────────────────────────────────────────────────────────────

pub(crate) fn as_millis(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.round() as i64))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// `scope` may be a space/comma separated string or an array of strings.
pub(crate) fn split_scope(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::SharedSecret;
    use serde_json::json;

    fn codec() -> TokenCodec {
        TokenCodec::new(EnvelopeCodec::new(SharedSecret::from("token-test-secret")))
    }

    fn claims() -> Map<String, Value> {
        json!({"userId": "user-42", "scope": "vehicles:read statements:write"})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn token_roundtrip_keeps_user() {
        let codec = codec();
        let token = codec.create_token(&claims(), 1.0).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let verified = codec.verify_token(&token).unwrap();
        assert_eq!(verified.user_id(), Some("user-42"));
        assert_eq!(verified.header.typ, TOKEN_TYPE);
        assert_eq!(verified.payload["iss"], DEFAULT_ISSUER);
        assert_eq!(
            verified.scope(),
            vec!["vehicles:read".to_string(), "statements:write".to_string()]
        );
    }

    #[test]
    fn expiry_and_issue_time_are_stamped() {
        let codec = codec();
        let now = now_ms();
        let token = codec.create_token_at(&claims(), 2.0, now).unwrap();
        let verified = codec.verify_token_at(&token, now).unwrap();
        assert_eq!(verified.payload["iat"], now);
        assert_eq!(verified.expires_at(), Some(now + 2 * 3_600_000));
    }

    #[test]
    fn short_lived_token_expires() {
        let codec = codec();
        let now = now_ms();
        let token = codec.create_token_at(&claims(), 0.0003, now).unwrap();
        assert!(codec.verify_token_at(&token, now).is_some());
        assert!(codec.verify_token_at(&token, now + 2_000).is_none());
        assert!(matches!(
            codec.inspect_token_at(&token, now + 2_000),
            Err(TokenRejection::Expired { .. })
        ));
    }

    #[test]
    fn sub_is_used_when_user_id_missing() {
        let codec = codec();
        let payload = json!({"sub": "subject-7"}).as_object().cloned().unwrap();
        let token = codec.create_token(&payload, 1.0).unwrap();
        assert_eq!(codec.verify_token(&token).unwrap().user_id(), Some("subject-7"));
    }

    #[test]
    fn wrong_shape_and_signature_are_rejected() {
        let codec = codec();
        let token = codec.create_token(&claims(), 1.0).unwrap();

        assert!(matches!(
            codec.inspect_token("a.b"),
            Err(TokenRejection::Shape(2))
        ));

        let (head, _) = token.rsplit_once('.').unwrap();
        let forged = format!("{head}.{}", "0".repeat(64));
        assert!(matches!(
            codec.inspect_token(&forged),
            Err(TokenRejection::BadSignature)
        ));
    }

    #[test]
    fn swapped_segments_are_rejected() {
        let codec = codec();
        let a = codec.create_token(&claims(), 1.0).unwrap();
        let b = codec.create_token(&claims(), 1.0).unwrap();
        let a_parts: Vec<&str> = a.split('.').collect();
        let b_parts: Vec<&str> = b.split('.').collect();
        let spliced = format!("{}.{}.{}", a_parts[0], b_parts[1], a_parts[2]);
        assert!(codec.verify_token(&spliced).is_none());
    }

    #[test]
    fn other_secret_rejects() {
        let token = codec().create_token(&claims(), 1.0).unwrap();
        let other = TokenCodec::new(EnvelopeCodec::new(SharedSecret::from("nope")));
        assert!(other.verify_token(&token).is_none());
    }

    #[test]
    fn scope_forms() {
        assert_eq!(split_scope(&json!("a, b  c")), vec!["a", "b", "c"]);
        assert_eq!(split_scope(&json!(["x", 3, "y"])), vec!["x", "y"]);
        assert!(split_scope(&json!(7)).is_empty());
    }
}
