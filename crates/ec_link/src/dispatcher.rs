//! Link dispatcher: parse → look up → token auth → login gate → invoke.
//!
//! Every failure ends the event. Errors are shown through the [`Notifier`]
//! and returned inside [`DispatchOutcome::Rejected`]; nothing propagates.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ec_crypto::AuthToken;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::action::Action;
use crate::error::LinkError;
use crate::notifier::{LoggingNotifier, Notifier};
use crate::params::LinkParams;
use crate::parser::LinkParser;
use crate::session::SessionContext;

pub const ORIGINAL_URL_PARAM: &str = "originalUrl";

// ── Handler and authenticator seams ──────────────────────────────────────────

#[async_trait::async_trait]
pub trait LinkHandler: Send + Sync {
    async fn invoke(&self, params: &LinkParams, token: Option<&AuthToken>) -> anyhow::Result<()>;
}

/// Decides whether a link token signs the user in. Registered once.
#[async_trait::async_trait]
pub trait TokenAuthenticator: Send + Sync {
    async fn authenticate(&self, token: &AuthToken, params: &LinkParams) -> anyhow::Result<bool>;
}

// ── Policy and settings ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerPolicy {
    pub requires_auth: bool,
    pub allows_token_auth: bool,
}

impl HandlerPolicy {
    /// No session needed, tokens refused.
    pub const PUBLIC: Self = Self {
        requires_auth: false,
        allows_token_auth: false,
    };
    /// No session needed, a token may sign in on the way.
    pub const OPEN: Self = Self {
        requires_auth: false,
        allows_token_auth: true,
    };
    pub const PROTECTED: Self = Self {
        requires_auth: true,
        allows_token_auth: true,
    };
    /// Needs an existing session; link tokens are refused.
    pub const SESSION_ONLY: Self = Self {
        requires_auth: true,
        allows_token_auth: false,
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherSettings {
    pub navigation_poll: Duration,
    pub navigation_timeout: Duration,
    pub auth_timeout: Option<Duration>,
    pub serialize_dispatch: bool,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            navigation_poll: Duration::from_millis(100),
            navigation_timeout: Duration::from_secs(5),
            auth_timeout: None,
            serialize_dispatch: false,
        }
    }
}

// ── Outcome ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Invoked {
        action: Action,
        token_authenticated: bool,
    },
    /// Handler skipped behind the login prompt.
    LoginRequired {
        action: Action,
        pending_stored: bool,
    },
    Rejected(LinkError),
}

// ── Registration ─────────────────────────────────────────────────────────────

struct Registration {
    policy: HandlerPolicy,
    handler: Arc<dyn LinkHandler>,
}

pub struct LinkDispatcherBuilder {
    parser: LinkParser,
    handlers: HashMap<Action, Registration>,
    authenticator: Option<Arc<dyn TokenAuthenticator>>,
    notifier: Arc<dyn Notifier>,
    settings: DispatcherSettings,
}

impl LinkDispatcherBuilder {
    /// A second registration for the same action replaces the first.
    pub fn register(
        self,
        action: Action,
        policy: HandlerPolicy,
        handler: impl LinkHandler + 'static,
    ) -> Self {
        self.register_arc(action, policy, Arc::new(handler))
    }

    pub fn register_arc(
        mut self,
        action: Action,
        policy: HandlerPolicy,
        handler: Arc<dyn LinkHandler>,
    ) -> Self {
        if self
            .handlers
            .insert(action, Registration { policy, handler })
            .is_some()
        {
            debug!(%action, "handler registration replaced");
        }
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn TokenAuthenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn settings(mut self, settings: DispatcherSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> LinkDispatcher {
        info!(
            handlers = self.handlers.len(),
            authenticator = self.authenticator.is_some(),
            "link dispatcher ready"
        );
        LinkDispatcher {
            parser: self.parser,
            handlers: self.handlers,
            authenticator: self.authenticator,
            notifier: self.notifier,
            gate: self
                .settings
                .serialize_dispatch
                .then(|| tokio::sync::Mutex::new(())),
            settings: self.settings,
        }
    }
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

pub struct LinkDispatcher {
    parser: LinkParser,
    handlers: HashMap<Action, Registration>,
    authenticator: Option<Arc<dyn TokenAuthenticator>>,
    notifier: Arc<dyn Notifier>,
    settings: DispatcherSettings,
    gate: Option<tokio::sync::Mutex<()>>,
}

impl LinkDispatcher {
    pub fn builder(parser: LinkParser) -> LinkDispatcherBuilder {
        LinkDispatcherBuilder {
            parser,
            handlers: HashMap::new(),
            authenticator: None,
            notifier: Arc::new(LoggingNotifier),
            settings: DispatcherSettings::default(),
        }
    }

    pub fn parser(&self) -> &LinkParser {
        &self.parser
    }

    pub fn policy(&self, action: Action) -> Option<HandlerPolicy> {
        self.handlers.get(&action).map(|r| r.policy)
    }

    pub async fn dispatch(&self, url: &str, session: &SessionContext) -> DispatchOutcome {
        let _serialized = match &self.gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };

        loop {
            match self.run(url, session).await {
                Ok(outcome) => return outcome,
                Err(err @ LinkError::AuthenticationFailed(_)) => {
                    warn!(error = %err, "link token authentication failed");
                    if self.notifier.offer_retry(&err.to_string()).await {
                        info!("retrying link authentication");
                        continue;
                    }
                    return DispatchOutcome::Rejected(err);
                }
                Err(err) => {
                    warn!(error = %err, "link rejected");
                    self.notifier.show_error(err.title(), &err.to_string());
                    return DispatchOutcome::Rejected(err);
                }
            }
        }
    }

    /// Re-dispatches the link parked behind the login prompt, if any.
    pub async fn resume_pending_link(&self, session: &SessionContext) -> Option<DispatchOutcome> {
        let url = session.take_pending_link()?;
        info!("resuming pending link");
        Some(self.dispatch(&url, session).await)
    }

    async fn run(&self, url: &str, session: &SessionContext) -> Result<DispatchOutcome, LinkError> {
        let report = self.parser.try_parse(url)?;
        if let Some(reason) = &report.fallback {
            debug!(%reason, action = %report.link.action, "link fell back");
        }
        let link = report.link;
        let action = link.action;

        let registration = self
            .handlers
            .get(&action)
            .ok_or_else(|| LinkError::UnknownAction(action.to_string()))?;

        let mut token_authenticated = false;
        if let Some(token) = &link.auth_token {
            if !registration.policy.allows_token_auth {
                return Err(LinkError::TokenNotAllowed(action));
            }
            if !token.is_valid() {
                return Err(LinkError::InvalidOrExpiredToken);
            }
            let authenticator = self
                .authenticator
                .as_ref()
                .ok_or(LinkError::AuthenticatorUnavailable)?;

            let mut params = link.params.clone();
            params.insert(ORIGINAL_URL_PARAM, url);
            let verdict = match self.settings.auth_timeout {
                Some(limit) => time::timeout(limit, authenticator.authenticate(token, &params))
                    .await
                    .map_err(|_| {
                        LinkError::AuthenticationFailed(format!(
                            "no answer within {}s",
                            limit.as_secs()
                        ))
                    })?,
                None => authenticator.authenticate(token, &params).await,
            };
            match verdict {
                Ok(true) => {
                    session.set_authenticated(true);
                    token_authenticated = true;
                    info!(%action, source = ?token.source, "link token authenticated");
                }
                Ok(false) => {
                    return Err(LinkError::AuthenticationFailed(
                        "token was not accepted".into(),
                    ))
                }
                Err(err) => {
                    return Err(LinkError::AuthenticationFailed(format!(
                        "an error occurred: {err}"
                    )))
                }
            }
        }

        if registration.policy.requires_auth && !token_authenticated && !session.is_authenticated()
        {
            return Ok(self.require_login(action, url, session).await);
        }

        self.wait_for_navigation(session).await;
        registration
            .handler
            .invoke(&link.params, link.auth_token.as_ref())
            .await
            .map_err(|err| {
                warn!(%action, error = %format!("{err:#}"), "link handler failed");
                LinkError::HandlerExecutionError(err.to_string())
            })?;

        info!(%action, token_authenticated, "link handled");
        Ok(DispatchOutcome::Invoked {
            action,
            token_authenticated,
        })
    }

    async fn require_login(&self, action: Action, url: &str, session: &SessionContext) -> DispatchOutcome {
        let err = LinkError::AuthenticationRequired(action);
        info!(%action, "{err}");
        if !self.notifier.confirm_login(action).await {
            return DispatchOutcome::LoginRequired {
                action,
                pending_stored: false,
            };
        }

        session.stash_pending_link(url);
        match self.handlers.get(&Action::Login) {
            Some(login) => {
                self.wait_for_navigation(session).await;
                if let Err(err) = login.handler.invoke(&LinkParams::new(), None).await {
                    warn!(error = %format!("{err:#}"), "login redirect failed");
                }
            }
            None => warn!("no login handler registered"),
        }
        DispatchOutcome::LoginRequired {
            action,
            pending_stored: true,
        }
    }

    /// Best effort: gives up after the ceiling and lets the handler run.
    async fn wait_for_navigation(&self, session: &SessionContext) {
        if session.is_navigation_ready() {
            return;
        }
        let deadline = Instant::now() + self.settings.navigation_timeout;
        while !session.is_navigation_ready() {
            if Instant::now() >= deadline {
                warn!(
                    timeout_ms = self.settings.navigation_timeout.as_millis() as u64,
                    "navigation not ready, proceeding anyway"
                );
                return;
            }
            time::sleep(self.settings.navigation_poll).await;
        }
    }
}
