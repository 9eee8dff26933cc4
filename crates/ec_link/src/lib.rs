//! ec_link — universal link parsing, dispatch and generation for eClaims
//!
//! # Module layout
//! - `config`        — `LinkConfig` from JSON file and environment
//! - `action`        — action allow-list and positional slots
//! - `params`        — insertion-ordered link parameters
//! - `parser`        — `https://<host>/<action>/...` to `ParsedLink`
//! - `session`       — authenticated flag, navigation readiness, pending link
//! - `notifier`      — user notices and prompts
//! - `dispatcher`    — handler registry and the dispatch state machine
//! - `handlers`      — built-in handlers and the `Navigator` trait
//! - `store`         — key-value backed vehicle, statement and identity stores
//! - `authenticator` — local and remote token authentication
//! - `generator`     — outbound plain, secure and vehicle links
//! - `runtime`       — everything wired from one `LinkConfig`

pub mod action;
pub mod authenticator;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod generator;
pub mod handlers;
pub mod notifier;
pub mod params;
pub mod parser;
pub mod runtime;
pub mod session;
pub mod store;

pub use action::Action;
pub use config::LinkConfig;
pub use dispatcher::{
    DispatchOutcome, DispatcherSettings, HandlerPolicy, LinkDispatcher, LinkHandler,
    TokenAuthenticator,
};
pub use error::{ConfigError, LinkError};
pub use generator::{LinkGenerator, SecureLinkOptions};
pub use handlers::{Navigator, Route};
pub use notifier::{LoggingNotifier, Notifier};
pub use params::LinkParams;
pub use parser::{LinkParser, ParseFallback, ParseReport, ParsedLink};
pub use runtime::LinkRuntime;
pub use session::SessionContext;
