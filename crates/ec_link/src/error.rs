use thiserror::Error;

use crate::action::Action;

/// Everything that can stop a single link event. Converted to a user
/// notice at the dispatch boundary; never propagated further.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("Invalid link format: {0}")]
    MalformedUrl(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Token authentication not supported for this action ({0})")]
    TokenNotAllowed(Action),

    #[error("The link token is invalid or expired")]
    InvalidOrExpiredToken,

    #[error("No token authenticator is registered")]
    AuthenticatorUnavailable,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Soft: ends in a login prompt, not an error dialog.
    #[error("Login required for {0}")]
    AuthenticationRequired(Action),

    #[error("Error processing link: {0}")]
    HandlerExecutionError(String),
}

impl LinkError {
    /// Dialog title shown to the user.
    pub fn title(&self) -> &'static str {
        match self {
            Self::MalformedUrl(_) => "Invalid link",
            Self::UnknownAction(_) => "Unknown action",
            Self::TokenNotAllowed(_)
            | Self::InvalidOrExpiredToken
            | Self::AuthenticatorUnavailable
            | Self::AuthenticationFailed(_) => "Authentication error",
            Self::AuthenticationRequired(_) => "Login Required",
            Self::HandlerExecutionError(_) => "Link error",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file could not be read: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("shared secret is missing (set ECLAIMS_SHARED_SECRET)")]
    MissingSecret,

    #[error("host allow-list is empty")]
    EmptyHosts,

    #[error("primary host {0} is not in the host allow-list")]
    InvalidHost(String),

    #[error("app scheme must not be empty")]
    EmptyScheme,

    #[error("http client: {0}")]
    HttpClient(String),
}
