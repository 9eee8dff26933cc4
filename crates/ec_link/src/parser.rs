//! Universal link parser.
//!
//! Only `https://<allowed host>/...` links are read past the scheme. Anything
//! that cannot be mapped to an allow-listed action collapses to `home` with
//! no params and no token; the reason is kept in [`ParseReport::fallback`].

use std::fmt;
use std::sync::Arc;

use ec_crypto::{AuthToken, TokenCodec};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::action::Action;
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::params::LinkParams;

/// Query keys that mark a mangled link as carrying vehicle data.
pub(crate) const VEHICLE_DATA_MARKERS: [&str; 3] = ["vehicleData", "vehicle_data", "vehicle-data"];

pub const TOKEN_PARAM: &str = "token";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedLink {
    pub action: Action,
    pub params: LinkParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<AuthToken>,
}

impl ParsedLink {
    pub fn home() -> Self {
        Self {
            action: Action::Home,
            params: LinkParams::new(),
            auth_token: None,
        }
    }
}

/// Why a link did not parse the straightforward way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFallback {
    NotAUrl(String),
    UnsupportedScheme(String),
    UnknownHost(String),
    EmptyPath,
    UnknownAction(String),
    /// The first segment carried the app's own scheme. `recovered` is the
    /// action found later in the path, or `vehicles` from a data marker.
    SchemeCollision { recovered: Option<Action> },
}

impl fmt::Display for ParseFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAUrl(err) => write!(f, "not a url ({err})"),
            Self::UnsupportedScheme(scheme) => write!(f, "unsupported scheme {scheme}"),
            Self::UnknownHost(host) => write!(f, "host {host} is not allow-listed"),
            Self::EmptyPath => f.write_str("empty path"),
            Self::UnknownAction(name) => write!(f, "unknown action {name}"),
            Self::SchemeCollision {
                recovered: Some(action),
            } => write!(f, "scheme collision recovered as {action}"),
            Self::SchemeCollision { recovered: None } => {
                f.write_str("scheme collision not recovered")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseReport {
    pub link: ParsedLink,
    pub fallback: Option<ParseFallback>,
}

impl ParseReport {
    fn reset(fallback: ParseFallback) -> Self {
        debug!(reason = %fallback, "link reset to home");
        Self {
            link: ParsedLink::home(),
            fallback: Some(fallback),
        }
    }
}

pub struct LinkParser {
    hosts: Vec<String>,
    app_scheme: String,
    tokens: Arc<TokenCodec>,
}

impl LinkParser {
    pub fn new<I, S>(hosts: I, app_scheme: impl Into<String>, tokens: Arc<TokenCodec>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts.into_iter().map(|h| normalize_host(h.as_ref())).collect(),
            app_scheme: app_scheme.into().trim().to_ascii_lowercase(),
            tokens,
        }
    }

    pub fn from_config(config: &LinkConfig, tokens: Arc<TokenCodec>) -> Self {
        Self::new(&config.hosts, config.app_scheme.clone(), tokens)
    }

    pub fn tokens(&self) -> &Arc<TokenCodec> {
        &self.tokens
    }

    pub fn parse(&self, url: &str) -> ParsedLink {
        self.parse_report(url).link
    }

    /// Like [`parse`](Self::parse) but strings that are not URLs at all are
    /// an error instead of a silent `home`.
    pub fn try_parse(&self, url: &str) -> Result<ParseReport, LinkError> {
        let parsed = Url::parse(url.trim()).map_err(|e| LinkError::MalformedUrl(e.to_string()))?;
        Ok(self.parse_url(&parsed, url))
    }

    pub fn parse_report(&self, url: &str) -> ParseReport {
        match Url::parse(url.trim()) {
            Ok(parsed) => self.parse_url(&parsed, url),
            Err(err) => ParseReport::reset(ParseFallback::NotAUrl(err.to_string())),
        }
    }

    fn parse_url(&self, url: &Url, raw: &str) -> ParseReport {
        if url.scheme() != "https" {
            return ParseReport::reset(ParseFallback::UnsupportedScheme(url.scheme().to_string()));
        }
        let host = url.host_str().map(normalize_host).unwrap_or_default();
        if !self.hosts.iter().any(|h| *h == host) {
            return ParseReport::reset(ParseFallback::UnknownHost(host));
        }

        let parts: Vec<String> = url
            .path_segments()
            .into_iter()
            .flatten()
            .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .collect();

        let mut fallback = None;
        let (action, rest) = match parts.split_first() {
            None => {
                fallback = Some(ParseFallback::EmptyPath);
                (Action::Home, &parts[..0])
            }
            Some((first, rest)) if self.collides_with_scheme(first) => {
                match self.recover_collision(url, rest) {
                    Some((action, rest)) => {
                        debug!(%action, "recovered link from scheme collision");
                        fallback = Some(ParseFallback::SchemeCollision {
                            recovered: Some(action),
                        });
                        (action, rest)
                    }
                    None => {
                        return ParseReport::reset(ParseFallback::SchemeCollision {
                            recovered: None,
                        })
                    }
                }
            }
            Some((first, rest)) => match Action::from_name(first) {
                Some(action) => (action, rest),
                None => return ParseReport::reset(ParseFallback::UnknownAction(first.clone())),
            },
        };

        let mut params = LinkParams::new();
        match action.positional_slots() {
            Some(slots) => {
                for (slot, value) in slots.iter().zip(rest) {
                    params.insert(*slot, value.as_str());
                }
            }
            None => {
                for pair in rest.chunks_exact(2) {
                    params.insert(pair[0].as_str(), pair[1].as_str());
                }
            }
        }

        let mut raw_token = None;
        for (key, value) in url.query_pairs() {
            if key == TOKEN_PARAM {
                // form decoding turns '+' into ' ', which base64 tokens cannot contain
                raw_token = Some(value.replace(' ', "+"));
            } else {
                params.insert(key.into_owned(), value.into_owned());
            }
        }
        let auth_token = raw_token.and_then(|t| self.tokens.parse_auth_token(&t));

        debug!(
            %action,
            params = params.len(),
            token = auth_token.is_some(),
            url_len = raw.len(),
            "link parsed"
        );
        ParseReport {
            link: ParsedLink {
                action,
                params,
                auth_token,
            },
            fallback,
        }
    }

    fn collides_with_scheme(&self, segment: &str) -> bool {
        !self.app_scheme.is_empty() && segment.to_ascii_lowercase().contains(&self.app_scheme)
    }

    /// One recovery pass: the first allow-listed action later in the path,
    /// else `vehicles` when the link carries vehicle data.
    fn recover_collision<'a>(
        &self,
        url: &Url,
        rest: &'a [String],
    ) -> Option<(Action, &'a [String])> {
        let found = rest
            .iter()
            .enumerate()
            .find_map(|(i, s)| Action::from_name(s).map(|a| (a, &rest[i + 1..])));
        if found.is_some() {
            return found;
        }
        let has_marker = VEHICLE_DATA_MARKERS.iter().any(|m| url.as_str().contains(m));
        has_marker.then_some((Action::Vehicles, &rest[..0]))
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}
