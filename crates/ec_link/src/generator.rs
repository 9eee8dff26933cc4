//! Outbound universal links.

use std::sync::Arc;

use ec_crypto::envelope::encode_legacy;
use ec_crypto::{CryptoError, TokenCodec};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::{Map, Value};
use tracing::debug;
use url::form_urlencoded;

use crate::action::Action;
use crate::config::LinkConfig;
use crate::params::LinkParams;
use crate::parser::TOKEN_PARAM;

/// Characters escaped inside a single path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureLinkOptions {
    pub expires_in_minutes: u32,
    pub scope: Vec<String>,
}

impl Default for SecureLinkOptions {
    fn default() -> Self {
        Self {
            expires_in_minutes: 60,
            scope: Vec::new(),
        }
    }
}

pub struct LinkGenerator {
    host: String,
    tokens: Arc<TokenCodec>,
}

impl LinkGenerator {
    pub fn new(host: impl Into<String>, tokens: Arc<TokenCodec>) -> Self {
        Self {
            host: host.into(),
            tokens,
        }
    }

    pub fn from_config(config: &LinkConfig, tokens: Arc<TokenCodec>) -> Self {
        Self::new(config.primary_host.clone(), tokens)
    }

    /// `https://<host>/<action>[/<k>/<v>]*[?token=<token>]`, params in
    /// insertion order. Actions with positional slots read these segments
    /// positionally, so callers order the map to match.
    pub fn build_link(&self, action: Action, params: &LinkParams, token: Option<&str>) -> String {
        let mut url = format!("https://{}/{}", self.host, action.as_str());
        for (key, value) in params.iter() {
            url.push('/');
            url.extend(utf8_percent_encode(key, SEGMENT));
            url.push('/');
            url.extend(utf8_percent_encode(value, SEGMENT));
        }
        if let Some(token) = token {
            url.push('?');
            url.push_str(
                &form_urlencoded::Serializer::new(String::new())
                    .append_pair(TOKEN_PARAM, token)
                    .finish(),
            );
        }
        url
    }

    /// Mints a secure token for `user_id` and attaches it.
    pub fn build_secure_link(
        &self,
        action: Action,
        user_id: &str,
        params: &LinkParams,
        options: &SecureLinkOptions,
    ) -> Result<String, CryptoError> {
        let mut payload = Map::new();
        payload.insert("userId".into(), Value::from(user_id));
        payload.insert("scope".into(), Value::from(options.scope.join(" ")));
        payload.insert("action".into(), Value::from(action.as_str()));

        let hours = f64::from(options.expires_in_minutes) / 60.0;
        let token = self.tokens.create_token(&payload, hours)?;
        debug!(%action, expires_in_minutes = options.expires_in_minutes, "secure link minted");
        Ok(self.build_link(action, params, Some(&token)))
    }

    /// `vehicles?vehicleData=…` carrying the vehicle either sealed in an
    /// envelope or in the legacy base64 form.
    pub fn build_vehicle_link(
        &self,
        vehicle: &Value,
        encrypted: bool,
        token: Option<&str>,
    ) -> Result<String, CryptoError> {
        let data = if encrypted {
            self.tokens.envelope().encrypt(vehicle)?
        } else {
            encode_legacy(vehicle)?
        };
        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("vehicleData", &data);
        if let Some(token) = token {
            query.append_pair(TOKEN_PARAM, token);
        }
        Ok(format!(
            "https://{}/{}?{}",
            self.host,
            Action::Vehicles.as_str(),
            query.finish()
        ))
    }
}
