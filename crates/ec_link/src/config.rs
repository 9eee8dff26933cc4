//! Link layer configuration.
//!
//! Loaded from an optional JSON file, then overridden from the environment:
//!
//! - `ECLAIMS_SHARED_SECRET`   secret shared with the master app
//! - `ECLAIMS_LINK_HOSTS`      comma separated host allow-list
//! - `ECLAIMS_PRIMARY_HOST`    host used when generating links
//! - `ECLAIMS_VALIDATION_URL`  remote token validation endpoint

use std::path::Path;
use std::time::Duration;

use ec_crypto::{EnvelopeCodec, SharedSecret, TokenCodec};
use serde::{Deserialize, Serialize};

use crate::dispatcher::DispatcherSettings;
use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub hosts: Vec<String>,
    pub primary_host: String,
    /// The app's own custom scheme, used to spot mangled links.
    pub app_scheme: String,
    #[serde(skip_serializing)]
    pub shared_secret: String,
    pub token_issuer: String,
    pub external_issuers: Vec<String>,
    pub envelope_max_age_secs: u64,
    pub navigation_poll_ms: u64,
    pub navigation_timeout_ms: u64,
    /// `None` waits on the authenticator indefinitely.
    pub auth_timeout_secs: Option<u64>,
    pub serialize_dispatch: bool,
    pub validation_endpoint: Option<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            hosts: vec![
                "eclaims.example.com".into(),
                "app.eclaims.example.com".into(),
                "links.eclaims.example.com".into(),
            ],
            primary_host: "eclaims.example.com".into(),
            app_scheme: "eclaims".into(),
            shared_secret: String::new(),
            token_issuer: ec_crypto::token::DEFAULT_ISSUER.into(),
            external_issuers: ec_crypto::auth_token::default_external_issuers(),
            envelope_max_age_secs: 300,
            navigation_poll_ms: 100,
            navigation_timeout_ms: 5_000,
            auth_timeout_secs: None,
            serialize_dispatch: false,
            validation_endpoint: None,
        }
    }
}

impl LinkConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    pub fn from_env() -> Self {
        Self::default().apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env(self) -> Self {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(secret) = present("ECLAIMS_SHARED_SECRET") {
            self.shared_secret = secret;
        }
        if let Some(hosts) = present("ECLAIMS_LINK_HOSTS") {
            self.hosts = hosts
                .split(',')
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect();
        }
        if let Some(host) = present("ECLAIMS_PRIMARY_HOST") {
            self.primary_host = host.trim().to_ascii_lowercase();
        }
        if let Some(url) = present("ECLAIMS_VALIDATION_URL") {
            self.validation_endpoint = Some(url);
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shared_secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        if self.hosts.is_empty() {
            return Err(ConfigError::EmptyHosts);
        }
        if !self
            .hosts
            .iter()
            .any(|h| h.eq_ignore_ascii_case(&self.primary_host))
        {
            return Err(ConfigError::InvalidHost(self.primary_host.clone()));
        }
        if self.app_scheme.trim().is_empty() {
            return Err(ConfigError::EmptyScheme);
        }
        Ok(())
    }

    pub fn envelope_codec(&self) -> EnvelopeCodec {
        EnvelopeCodec::new(SharedSecret::from(self.shared_secret.as_str()))
            .with_max_age(Duration::from_secs(self.envelope_max_age_secs))
    }

    pub fn token_codec(&self) -> TokenCodec {
        TokenCodec::new(self.envelope_codec())
            .with_issuer(self.token_issuer.clone())
            .with_external_issuers(self.external_issuers.clone())
    }

    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            navigation_poll: Duration::from_millis(self.navigation_poll_ms),
            navigation_timeout: Duration::from_millis(self.navigation_timeout_ms),
            auth_timeout: self.auth_timeout_secs.map(Duration::from_secs),
            serialize_dispatch: self.serialize_dispatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_need_a_secret() {
        assert!(matches!(
            LinkConfig::default().validate(),
            Err(ConfigError::MissingSecret)
        ));
    }

    #[test]
    fn default_issuers_match_token_parser() {
        assert_eq!(
            LinkConfig::default().external_issuers,
            ec_crypto::auth_token::default_external_issuers()
        );
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ECLAIMS_SHARED_SECRET", "from-env"),
            ("ECLAIMS_LINK_HOSTS", "A.example.com, b.example.com"),
            ("ECLAIMS_PRIMARY_HOST", "b.example.com"),
            ("ECLAIMS_VALIDATION_URL", ""),
        ]
        .into_iter()
        .collect();
        let config =
            LinkConfig::default().apply_env_from(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.shared_secret, "from-env");
        assert_eq!(config.hosts, vec!["a.example.com", "b.example.com"]);
        assert_eq!(config.primary_host, "b.example.com");
        assert_eq!(config.validation_endpoint, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn primary_host_must_be_allowed() {
        let config = LinkConfig {
            shared_secret: "s".into(),
            primary_host: "elsewhere.example.com".into(),
            ..LinkConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHost(_))
        ));
    }

    #[test]
    fn loads_partial_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"shared_secret":"file-secret","auth_timeout_secs":15,"serialize_dispatch":true}}"#
        )
        .unwrap();

        let config = LinkConfig::load(file.path()).unwrap();
        assert_eq!(config.shared_secret, "file-secret");
        assert_eq!(config.primary_host, "eclaims.example.com");

        let settings = config.dispatcher_settings();
        assert_eq!(settings.auth_timeout, Some(Duration::from_secs(15)));
        assert!(settings.serialize_dispatch);
        assert_eq!(settings.navigation_poll, Duration::from_millis(100));
    }

    #[test]
    fn secret_is_not_serialized() {
        let config = LinkConfig {
            shared_secret: "hidden".into(),
            ..LinkConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hidden"));
    }
}
