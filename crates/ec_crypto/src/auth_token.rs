//! Normalized auth token and the multi-format token parser.
//!
//! Every encoding a `token` link parameter may carry ends up as one
//! [`AuthToken`]. Decoders are tried in order:
//!
//! 1. externally issued JWT (issuer pattern match, signature NOT verified)
//! 2. self-issued secure JWT ([`TokenCodec::verify_token`])
//! 3. any other 3-segment token, middle segment decoded naively
//! 4. whole-string base64 JSON, URL-safe then standard (`valid_` prefix stripped)
//! 5. degraded token: empty user, 24 h expiry
//!
//! Nothing here returns an error. A present-but-unreadable token still
//! yields a degraded [`AuthToken`] so the generic auth flow can take over.
//! A token that was readable but is past its expiry never degrades: it
//! keeps the expiry it was read with, so [`AuthToken::is_valid`] fails.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::encoding;
use crate::envelope::EnvelopeCodec;
use crate::now_ms;
use crate::token::{as_millis, split_scope, TokenCodec, TokenRejection};

pub const MIN_RAW_TOKEN_LEN: usize = 10;
pub const DEGRADED_TTL_MS: i64 = 24 * 60 * 60 * 1000;
pub const LEGACY_PREFIX: &str = "valid_";

/// Below this an `exp` claim is read as Unix seconds.
const SECONDS_THRESHOLD: i64 = 10_000_000_000;

/// Issuer substrings treated as external identity providers.
pub fn default_external_issuers() -> Vec<String> {
    vec![
        "cognito-idp.".to_string(),
        "login.microsoftonline.com".to_string(),
        "accounts.google.com".to_string(),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    ExternalJwt,
    SecureJwt,
    LegacyJwt,
    Base64Json,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthToken {
    pub raw_token: String,
    pub user_id: String,
    /// Absolute expiry, ms since epoch.
    pub expires_at: Option<i64>,
    pub scope: Vec<String>,
    pub source: TokenSource,
}

impl AuthToken {
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(now_ms())
    }

    /// Shape and freshness only. `user_id` is checked where it is used.
    pub fn is_valid_at(&self, now: i64) -> bool {
        self.raw_token.len() >= MIN_RAW_TOKEN_LEN && !self.is_expired_at(now)
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope.iter().any(|s| s == scope)
    }

    fn lapsed(raw: &str, expires_at: i64, source: TokenSource) -> Self {
        Self {
            raw_token: raw.to_string(),
            user_id: String::new(),
            expires_at: Some(expires_at),
            scope: Vec::new(),
            source,
        }
    }

    fn degraded(raw: &str, now: i64) -> Self {
        Self {
            raw_token: raw.to_string(),
            user_id: String::new(),
            expires_at: Some(now + DEGRADED_TTL_MS),
            scope: Vec::new(),
            source: TokenSource::Degraded,
        }
    }
}

// ── Multi-format parser ──────────────────────────────────────────────────────

impl TokenCodec {
    pub fn parse_auth_token(&self, token: &str) -> Option<AuthToken> {
        self.parse_auth_token_at(token, now_ms())
    }

    /// `None` only for an empty string.
    pub fn parse_auth_token_at(&self, token: &str, now: i64) -> Option<AuthToken> {
        let raw = token.trim();
        if raw.is_empty() {
            return None;
        }
        let three_segments = raw.matches('.').count() == 2;

        if three_segments {
            if let Some(parsed) = self.decode_external_jwt(raw, now) {
                return Some(parsed);
            }
        }

        match self.inspect_token_at(raw, now) {
            Ok(verified) => {
                return Some(AuthToken {
                    raw_token: raw.to_string(),
                    user_id: verified.user_id().unwrap_or_default().to_string(),
                    expires_at: verified.expires_at(),
                    scope: verified.scope(),
                    source: TokenSource::SecureJwt,
                });
            }
            Err(TokenRejection::Shape(_)) => {}
            Err(reason) if is_self_issued_shape(raw) => {
                debug!(%reason, "self-issued token rejected");
                let expires_at = match reason {
                    TokenRejection::Expired { exp } => exp,
                    _ => now,
                };
                return Some(AuthToken::lapsed(raw, expires_at, TokenSource::SecureJwt));
            }
            Err(reason) => debug!(%reason, "not a self-issued token"),
        }

        if three_segments {
            if let Some(parsed) = decode_legacy_jwt(raw, now) {
                return Some(parsed);
            }
        }

        if let Some(parsed) = decode_base64_json(raw, now) {
            return Some(parsed);
        }

        debug!(len = raw.len(), "token unreadable, using degraded token");
        Some(AuthToken::degraded(raw, now))
    }

    fn decode_external_jwt(&self, raw: &str, now: i64) -> Option<AuthToken> {
        let mut segments = raw.split('.');
        let header = encoding::decode_json_object(segments.next()?).ok()?;
        let claims = encoding::decode_json_object(segments.next()?).ok()?;
        if !header.contains_key("alg") {
            return None;
        }

        let issuer = claims.get("iss")?.as_str()?;
        if !self
            .external_issuers
            .iter()
            .any(|pattern| issuer.contains(pattern.as_str()))
        {
            return None;
        }

        // TODO: verify against the issuer's published JWKS before trusting claims.
        warn!(%issuer, "external token accepted without issuer signature verification");

        let expires_at = claims.get("exp").and_then(as_millis).map(normalize_epoch);
        if expires_at.is_some_and(|exp| exp <= now) {
            debug!(%issuer, "external token expired");
            return None;
        }

        Some(from_claims(raw, &claims, expires_at, TokenSource::ExternalJwt))
    }
}

// ── Fallback decoders ────────────────────────────────────────────────────────

/// Header and payload segments are both envelopes.
fn is_self_issued_shape(raw: &str) -> bool {
    let mut segments = raw.split('.');
    matches!(
        (segments.next(), segments.next()),
        (Some(header), Some(payload))
            if EnvelopeCodec::is_encrypted_envelope(header)
                && EnvelopeCodec::is_encrypted_envelope(payload)
    )
}

fn decode_legacy_jwt(raw: &str, now: i64) -> Option<AuthToken> {
    let middle = raw.split('.').nth(1)?;
    let claims = encoding::decode_json_object(middle).ok()?;
    readable_claims(raw, &claims, now, TokenSource::LegacyJwt)
}

fn decode_base64_json(raw: &str, now: i64) -> Option<AuthToken> {
    let body = raw.strip_prefix(LEGACY_PREFIX).unwrap_or(raw);
    let bytes = encoding::decode_url_safe(body)
        .or_else(|_| encoding::decode_standard(body))
        .ok()?;
    let Ok(Value::Object(claims)) = serde_json::from_slice::<Value>(&bytes) else {
        return None;
    };
    readable_claims(raw, &claims, now, TokenSource::Base64Json)
}

/// Claims need an identity to be used, but a past expiry is honoured even
/// without one.
fn readable_claims(
    raw: &str,
    claims: &Map<String, Value>,
    now: i64,
    source: TokenSource,
) -> Option<AuthToken> {
    let expires_at = expiry_claim(claims);
    let lapsed = expires_at.is_some_and(|exp| exp <= now);
    (has_identity(claims) || lapsed).then(|| from_claims(raw, claims, expires_at, source))
}

fn has_identity(claims: &Map<String, Value>) -> bool {
    ["userId", "sub", "user_id"]
        .iter()
        .any(|key| claims.get(*key).is_some_and(Value::is_string))
}

fn expiry_claim(claims: &Map<String, Value>) -> Option<i64> {
    claims
        .get("expiresAt")
        .or_else(|| claims.get("exp"))
        .and_then(as_millis)
        .map(normalize_epoch)
}

fn normalize_epoch(value: i64) -> i64 {
    if value < SECONDS_THRESHOLD {
        value.saturating_mul(1000)
    } else {
        value
    }
}

fn from_claims(
    raw: &str,
    claims: &Map<String, Value>,
    expires_at: Option<i64>,
    source: TokenSource,
) -> AuthToken {
    let user_id = ["userId", "sub", "user_id"]
        .iter()
        .find_map(|key| claims.get(*key).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();
    AuthToken {
        raw_token: raw.to_string(),
        user_id,
        expires_at,
        scope: claims.get("scope").map(split_scope).unwrap_or_default(),
        source,
    }
}
