//! Base64 helpers for the text-safe wire forms.
//!
//! Current format is URL-safe without padding. Older master app builds emit
//! standard base64, and query-string decoding turns `+` into a space, so the
//! lenient decoder accepts all of those.

use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;

use crate::error::CryptoError;

pub fn encode_url_safe(bytes: &[u8]) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

pub fn encode_standard(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

pub fn decode_url_safe(text: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(general_purpose::URL_SAFE_NO_PAD.decode(text.trim_end_matches('='))?)
}

pub fn decode_standard(text: &str) -> Result<Vec<u8>, CryptoError> {
    let restored = text.replace(' ', "+");
    let unpadded = restored.trim().trim_end_matches('=');
    Ok(general_purpose::STANDARD_NO_PAD.decode(unpadded)?)
}

/// URL-safe first, then standard alphabet.
pub fn decode_lenient(text: &str) -> Result<Vec<u8>, CryptoError> {
    let restored = text
        .trim_matches(|c| c == '\n' || c == '\r' || c == '\t')
        .replace(' ', "+");
    decode_url_safe(&restored).or_else(|_| decode_standard(&restored))
}

/// Decode a base64 blob that should hold a JSON object.
pub fn decode_json_object(text: &str) -> Result<serde_json::Map<String, Value>, CryptoError> {
    let bytes = decode_lenient(text)?;
    match serde_json::from_slice::<Value>(&bytes)? {
        Value::Object(map) => Ok(map),
        other => Err(CryptoError::MalformedEnvelope(format!(
            "expected JSON object, found {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
