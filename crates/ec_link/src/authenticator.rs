//! Token authenticators: local trust decision or the remote validation
//! endpoint, followed by storing the identity.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use ec_crypto::{AuthToken, TokenSource};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dispatcher::TokenAuthenticator;
use crate::error::ConfigError;
use crate::params::LinkParams;
use crate::store::{Identity, IdentityStore};

pub const VALIDATE_PATH: &str = "/auth/validate-token";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateRequest<'a> {
    token: &'a str,
    user_id: &'a str,
    params: &'a LinkParams,
}

#[derive(Deserialize)]
struct ValidateResponse {
    #[serde(default)]
    valid: bool,
}

#[derive(Clone)]
pub struct RemoteValidator {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteValidator {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .user_agent("eclaims-link/0.1")
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, VALIDATE_PATH)
    }

    pub async fn validate(&self, token: &AuthToken, params: &LinkParams) -> Result<bool> {
        let res = self
            .client
            .post(self.endpoint())
            .bearer_auth(&token.raw_token)
            .json(&ValidateRequest {
                token: &token.raw_token,
                user_id: &token.user_id,
                params,
            })
            .send()
            .await?;
        if matches!(res.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            debug!(status = %res.status(), "token refused by validation endpoint");
            return Ok(false);
        }
        if !res.status().is_success() {
            return Err(anyhow!("token validation failed with status {}", res.status()));
        }
        let body: ValidateResponse = res.json().await?;
        Ok(body.valid)
    }
}

/// Accepts a link token and signs its user in.
///
/// Without a remote validator only self-issued secure tokens are trusted;
/// every other source needs the backend's answer.
pub struct IdentityAuthenticator {
    identities: Arc<IdentityStore>,
    remote: Option<RemoteValidator>,
}

impl IdentityAuthenticator {
    pub fn local(identities: Arc<IdentityStore>) -> Self {
        Self {
            identities,
            remote: None,
        }
    }

    pub fn with_remote(identities: Arc<IdentityStore>, remote: RemoteValidator) -> Self {
        Self {
            identities,
            remote: Some(remote),
        }
    }
}

#[async_trait::async_trait]
impl TokenAuthenticator for IdentityAuthenticator {
    async fn authenticate(&self, token: &AuthToken, params: &LinkParams) -> Result<bool> {
        let accepted = match &self.remote {
            Some(remote) => remote.validate(token, params).await?,
            None => token.source == TokenSource::SecureJwt && !token.user_id.is_empty(),
        };
        if !accepted {
            warn!(source = ?token.source, "link token not accepted");
            return Ok(false);
        }

        if token.user_id.is_empty() {
            info!("token accepted without a user id, identity not stored");
        } else {
            self.identities.sign_in(&Identity {
                user_id: token.user_id.clone(),
                token: token.raw_token.clone(),
                scope: token.scope.clone(),
                expires_at: token.expires_at,
                signed_in_at: Utc::now(),
            })?;
        }
        Ok(true)
    }
}
