use std::sync::Arc;

use ec_crypto::TokenCodec;
use tracing::info;

use crate::authenticator::{IdentityAuthenticator, RemoteValidator};
use crate::config::LinkConfig;
use crate::dispatcher::{DispatchOutcome, LinkDispatcher, TokenAuthenticator};
use crate::error::ConfigError;
use crate::generator::LinkGenerator;
use crate::handlers::{register_builtin_handlers, Navigator, Services};
use crate::notifier::Notifier;
use crate::parser::LinkParser;
use crate::session::SessionContext;
use crate::store::{IdentityStore, KeyValueStore, StatementStore, VehicleStore};

/// The link layer as the host app sees it: one instance built at startup.
pub struct LinkRuntime {
    config: LinkConfig,
    services: Services,
    dispatcher: LinkDispatcher,
    generator: LinkGenerator,
    session: Arc<SessionContext>,
}

impl LinkRuntime {
    pub fn from_config(
        config: LinkConfig,
        navigator: Arc<dyn Navigator>,
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let tokens: Arc<TokenCodec> = Arc::new(config.token_codec());
        let services = Services {
            tokens: tokens.clone(),
            navigator,
            vehicles: Arc::new(VehicleStore::new(store.clone())),
            statements: Arc::new(StatementStore::new(store.clone())),
            identities: Arc::new(IdentityStore::new(store)),
        };

        let authenticator: Arc<dyn TokenAuthenticator> = match &config.validation_endpoint {
            Some(endpoint) => Arc::new(IdentityAuthenticator::with_remote(
                services.identities.clone(),
                RemoteValidator::new(endpoint)?,
            )),
            None => Arc::new(IdentityAuthenticator::local(services.identities.clone())),
        };

        let builder = LinkDispatcher::builder(LinkParser::from_config(&config, tokens.clone()))
            .authenticator(authenticator)
            .notifier(notifier)
            .settings(config.dispatcher_settings());
        let dispatcher = register_builtin_handlers(builder, &services).build();

        info!(
            hosts = config.hosts.len(),
            primary = %config.primary_host,
            remote_validation = config.validation_endpoint.is_some(),
            "link runtime started"
        );
        Ok(Self {
            generator: LinkGenerator::from_config(&config, tokens),
            config,
            services,
            dispatcher,
            session: Arc::new(SessionContext::new()),
        })
    }

    pub async fn handle_url(&self, url: &str) -> DispatchOutcome {
        self.dispatcher.dispatch(url, &self.session).await
    }

    /// Called by the host after an interactive login succeeded.
    pub async fn complete_login(&self) -> Option<DispatchOutcome> {
        self.session.set_authenticated(true);
        self.dispatcher.resume_pending_link(&self.session).await
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn dispatcher(&self) -> &LinkDispatcher {
        &self.dispatcher
    }

    pub fn generator(&self) -> &LinkGenerator {
        &self.generator
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }
}
