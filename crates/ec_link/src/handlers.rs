//! Built-in handlers for every allow-listed action.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use ec_crypto::{AuthToken, TokenCodec};
use serde::Serialize;
use tracing::{debug, info};

use crate::action::Action;
use crate::dispatcher::{HandlerPolicy, LinkDispatcherBuilder, LinkHandler};
use crate::params::LinkParams;
use crate::parser::VEHICLE_DATA_MARKERS;
use crate::store::{Identity, IdentityStore, StatementStore, VehicleStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub screen: &'static str,
    pub params: LinkParams,
}

impl Route {
    pub fn new(screen: &'static str, params: LinkParams) -> Self {
        Self { screen, params }
    }
}

/// Host navigation stack.
#[async_trait::async_trait]
pub trait Navigator: Send + Sync {
    async fn navigate(&self, route: Route) -> Result<()>;
}

/// Headless navigator that only logs where the app would go.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNavigator;

#[async_trait::async_trait]
impl Navigator for LoggingNavigator {
    async fn navigate(&self, route: Route) -> Result<()> {
        info!(screen = route.screen, params = route.params.len(), "navigate");
        Ok(())
    }
}

pub fn screen_for(action: Action) -> &'static str {
    match action {
        Action::Home | Action::MasterAuth | Action::SessionSync | Action::TokenRefresh => "Home",
        Action::Vehicles => "Vehicles",
        Action::Vehicle => "VehicleDetails",
        Action::AddVehicle => "AddVehicle",
        Action::Damage => "DamageReport",
        Action::Camera => "Camera",
        Action::Statement => "Statement",
        Action::Statements => "Statements",
        Action::NewStatement => "NewStatement",
        Action::Emergency => "Emergency",
        Action::Settings => "Settings",
        Action::Login => "Login",
    }
}

pub fn builtin_policy(action: Action) -> HandlerPolicy {
    match action {
        Action::Home | Action::MasterAuth | Action::SessionSync => HandlerPolicy::OPEN,
        Action::Camera | Action::Settings => HandlerPolicy::SESSION_ONLY,
        Action::Emergency | Action::Login => HandlerPolicy::PUBLIC,
        Action::Vehicles
        | Action::Vehicle
        | Action::AddVehicle
        | Action::Damage
        | Action::Statement
        | Action::Statements
        | Action::NewStatement
        | Action::TokenRefresh => HandlerPolicy::PROTECTED,
    }
}

fn vehicle_data(params: &LinkParams) -> Option<&str> {
    VEHICLE_DATA_MARKERS.iter().find_map(|key| params.get(key))
}

fn without_vehicle_data(params: &LinkParams) -> LinkParams {
    params
        .iter()
        .filter(|(k, _)| !VEHICLE_DATA_MARKERS.contains(k))
        .collect()
}

fn identity_from(token: &AuthToken) -> Result<Identity> {
    if token.user_id.is_empty() {
        bail!("link token carries no user identity");
    }
    Ok(Identity {
        user_id: token.user_id.clone(),
        token: token.raw_token.clone(),
        scope: token.scope.clone(),
        expires_at: token.expires_at,
        signed_in_at: Utc::now(),
    })
}

/// Plain screen switch.
pub struct NavigateHandler {
    screen: &'static str,
    navigator: Arc<dyn Navigator>,
}

impl NavigateHandler {
    pub fn new(action: Action, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            screen: screen_for(action),
            navigator,
        }
    }
}

#[async_trait::async_trait]
impl LinkHandler for NavigateHandler {
    async fn invoke(&self, params: &LinkParams, _token: Option<&AuthToken>) -> Result<()> {
        self.navigator
            .navigate(Route::new(self.screen, params.clone()))
            .await
    }
}

fn import_vehicle_data(tokens: &TokenCodec, vehicles: &VehicleStore, raw: &str) -> Result<usize> {
    let data = tokens
        .envelope()
        .smart_extract_vehicle_data(raw)
        .ok_or_else(|| anyhow!("vehicle data could not be read"))?;
    vehicles.import(data)
}

pub struct VehiclesHandler {
    tokens: Arc<TokenCodec>,
    vehicles: Arc<VehicleStore>,
    navigator: Arc<dyn Navigator>,
}

impl VehiclesHandler {
    pub fn new(
        tokens: Arc<TokenCodec>,
        vehicles: Arc<VehicleStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            tokens,
            vehicles,
            navigator,
        }
    }
}

#[async_trait::async_trait]
impl LinkHandler for VehiclesHandler {
    async fn invoke(&self, params: &LinkParams, _token: Option<&AuthToken>) -> Result<()> {
        if let Some(raw) = vehicle_data(params) {
            let imported = import_vehicle_data(&self.tokens, &self.vehicles, raw)?;
            debug!(imported, "vehicles link carried data");
        }
        self.navigator
            .navigate(Route::new(
                screen_for(Action::Vehicles),
                without_vehicle_data(params),
            ))
            .await
    }
}

/// Sign-in handed over from the master app, optionally with vehicles.
pub struct MasterAuthHandler {
    tokens: Arc<TokenCodec>,
    identities: Arc<IdentityStore>,
    vehicles: Arc<VehicleStore>,
    navigator: Arc<dyn Navigator>,
}

impl MasterAuthHandler {
    pub fn new(
        tokens: Arc<TokenCodec>,
        identities: Arc<IdentityStore>,
        vehicles: Arc<VehicleStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            tokens,
            identities,
            vehicles,
            navigator,
        }
    }
}

#[async_trait::async_trait]
impl LinkHandler for MasterAuthHandler {
    async fn invoke(&self, params: &LinkParams, token: Option<&AuthToken>) -> Result<()> {
        let token = token.context("master-auth link without token")?;
        let identity = identity_from(token)?;
        self.identities.sign_in(&identity)?;

        if let Some(raw) = vehicle_data(params) {
            let imported = import_vehicle_data(&self.tokens, &self.vehicles, raw)?;
            info!(user = %identity.user_id, imported, "master app handed over vehicles");
        }
        self.navigator
            .navigate(Route::new(screen_for(Action::MasterAuth), LinkParams::new()))
            .await
    }
}

pub struct TokenRefreshHandler {
    identities: Arc<IdentityStore>,
}

impl TokenRefreshHandler {
    pub fn new(identities: Arc<IdentityStore>) -> Self {
        Self { identities }
    }
}

#[async_trait::async_trait]
impl LinkHandler for TokenRefreshHandler {
    async fn invoke(&self, _params: &LinkParams, token: Option<&AuthToken>) -> Result<()> {
        let token = token.context("token-refresh link without token")?;
        if !self
            .identities
            .refresh_token(&token.raw_token, token.expires_at)?
        {
            self.identities.sign_in(&identity_from(token)?)?;
        }
        info!("session token refreshed from link");
        Ok(())
    }
}

pub struct SessionSyncHandler {
    identities: Arc<IdentityStore>,
}

impl SessionSyncHandler {
    pub fn new(identities: Arc<IdentityStore>) -> Self {
        Self { identities }
    }
}

#[async_trait::async_trait]
impl LinkHandler for SessionSyncHandler {
    async fn invoke(&self, _params: &LinkParams, token: Option<&AuthToken>) -> Result<()> {
        let token = token.context("session-sync link without token")?;
        self.identities.sign_in(&identity_from(token)?)
    }
}

pub struct NewStatementHandler {
    statements: Arc<StatementStore>,
    navigator: Arc<dyn Navigator>,
}

impl NewStatementHandler {
    pub fn new(statements: Arc<StatementStore>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            statements,
            navigator,
        }
    }
}

#[async_trait::async_trait]
impl LinkHandler for NewStatementHandler {
    async fn invoke(&self, params: &LinkParams, _token: Option<&AuthToken>) -> Result<()> {
        let draft = self.statements.create_draft(params.get("vehicleId"))?;
        let mut route_params = params.clone();
        route_params.insert("statementId", draft.id);
        self.navigator
            .navigate(Route::new(screen_for(Action::NewStatement), route_params))
            .await
    }
}

/// Everything the built-in handlers talk to.
#[derive(Clone)]
pub struct Services {
    pub tokens: Arc<TokenCodec>,
    pub navigator: Arc<dyn Navigator>,
    pub vehicles: Arc<VehicleStore>,
    pub statements: Arc<StatementStore>,
    pub identities: Arc<IdentityStore>,
}

pub fn register_builtin_handlers(
    mut builder: LinkDispatcherBuilder,
    services: &Services,
) -> LinkDispatcherBuilder {
    for action in Action::ALL {
        let handler: Arc<dyn LinkHandler> = match action {
            Action::Vehicles => Arc::new(VehiclesHandler::new(
                services.tokens.clone(),
                services.vehicles.clone(),
                services.navigator.clone(),
            )),
            Action::MasterAuth => Arc::new(MasterAuthHandler::new(
                services.tokens.clone(),
                services.identities.clone(),
                services.vehicles.clone(),
                services.navigator.clone(),
            )),
            Action::TokenRefresh => Arc::new(TokenRefreshHandler::new(services.identities.clone())),
            Action::SessionSync => Arc::new(SessionSyncHandler::new(services.identities.clone())),
            Action::NewStatement => Arc::new(NewStatementHandler::new(
                services.statements.clone(),
                services.navigator.clone(),
            )),
            other => Arc::new(NavigateHandler::new(other, services.navigator.clone())),
        };
        builder = builder.register_arc(action, builtin_policy(action), handler);
    }
    builder
}
