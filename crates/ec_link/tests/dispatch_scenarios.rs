use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ec_crypto::AuthToken;
use ec_link::store::{KeyValueStore, MemoryStore, VehicleStore};
use ec_link::{
    Action, DispatchOutcome, HandlerPolicy, LinkConfig, LinkDispatcher, LinkError, LinkHandler,
    LinkParams, LinkParser, LinkRuntime, Navigator, Notifier, Route, SecureLinkOptions,
    SessionContext,
};
use parking_lot::Mutex;
use serde_json::json;

#[derive(Default)]
struct RecordingNavigator(Mutex<Vec<Route>>);

#[async_trait::async_trait]
impl Navigator for RecordingNavigator {
    async fn navigate(&self, route: Route) -> anyhow::Result<()> {
        self.0.lock().push(route);
        Ok(())
    }
}

impl RecordingNavigator {
    fn screens(&self) -> Vec<&'static str> {
        self.0.lock().iter().map(|r| r.screen).collect()
    }
}

struct RecordingNotifier {
    accept_login: bool,
    errors: Mutex<Vec<String>>,
    login_prompts: Mutex<Vec<Action>>,
}

impl RecordingNotifier {
    fn new(accept_login: bool) -> Self {
        Self {
            accept_login,
            errors: Mutex::new(Vec::new()),
            login_prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    fn show_error(&self, title: &str, message: &str) {
        self.errors.lock().push(format!("{title}: {message}"));
    }

    async fn confirm_login(&self, action: Action) -> bool {
        self.login_prompts.lock().push(action);
        self.accept_login
    }

    async fn offer_retry(&self, _message: &str) -> bool {
        false
    }
}

#[derive(Clone, Default)]
struct CountingHandler(Arc<AtomicUsize>);

#[async_trait::async_trait]
impl LinkHandler for CountingHandler {
    async fn invoke(&self, _: &LinkParams, _: Option<&AuthToken>) -> anyhow::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    runtime: LinkRuntime,
    navigator: Arc<RecordingNavigator>,
    notifier: Arc<RecordingNotifier>,
    store: Arc<dyn KeyValueStore>,
}

fn harness() -> Harness {
    let navigator = Arc::new(RecordingNavigator::default());
    let notifier = Arc::new(RecordingNotifier::new(true));
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let config = LinkConfig {
        shared_secret: "scenario-shared-secret".into(),
        ..LinkConfig::default()
    };
    let runtime =
        LinkRuntime::from_config(config, navigator.clone(), store.clone(), notifier.clone())
            .unwrap();
    runtime.session().set_navigation_ready(true);
    Harness {
        runtime,
        navigator,
        notifier,
        store,
    }
}

#[tokio::test]
async fn statement_link_reaches_statement_screen() {
    let h = harness();
    h.runtime.session().set_authenticated(true);

    let outcome = h
        .runtime
        .handle_url("https://eclaims.example.com/statement/abc123/view")
        .await;

    assert_eq!(
        outcome,
        DispatchOutcome::Invoked {
            action: Action::Statement,
            token_authenticated: false
        }
    );
    let routes = h.navigator.0.lock();
    assert_eq!(routes[0].screen, "Statement");
    assert_eq!(
        routes[0].params.iter().collect::<Vec<_>>(),
        vec![("statementId", "abc123"), ("mode", "view")]
    );
}

#[tokio::test]
async fn legacy_vehicle_link_imports_one_vehicle() {
    let h = harness();
    h.runtime.session().set_authenticated(true);
    let vehicle = json!({"licensePlate": "AB-123-CD", "make": "Renault", "model": "Clio"});
    let url = h
        .runtime
        .generator()
        .build_vehicle_link(&vehicle, false, None)
        .unwrap();

    let outcome = h.runtime.handle_url(&url).await;

    assert!(matches!(outcome, DispatchOutcome::Invoked { .. }));
    let stored = VehicleStore::new(h.store.clone()).list().unwrap();
    assert_eq!(stored, vec![vehicle]);
    assert_eq!(h.navigator.screens(), vec!["Vehicles"]);
}

#[tokio::test]
async fn encrypted_vehicle_link_is_idempotent() {
    let h = harness();
    h.runtime.session().set_authenticated(true);
    let vehicle = json!({"id": "veh-1", "make": "Peugeot"});
    let url = h
        .runtime
        .generator()
        .build_vehicle_link(&vehicle, true, None)
        .unwrap();

    h.runtime.handle_url(&url).await;
    h.runtime.handle_url(&url).await;

    assert_eq!(h.runtime.services().vehicles.list().unwrap(), vec![vehicle]);
}

#[tokio::test]
async fn protected_home_without_session_prompts_for_login() {
    let handler = CountingHandler::default();
    let login = CountingHandler::default();
    let notifier = Arc::new(RecordingNotifier::new(true));
    let tokens = Arc::new(LinkConfig {
        shared_secret: "s".into(),
        ..LinkConfig::default()
    }
    .token_codec());
    let dispatcher = LinkDispatcher::builder(LinkParser::new(
        ["eclaims.example.com"],
        "eclaims",
        tokens,
    ))
    .register(Action::Home, HandlerPolicy::PROTECTED, handler.clone())
    .register(Action::Login, HandlerPolicy::PUBLIC, login.clone())
    .notifier(notifier.clone())
    .build();

    let session = SessionContext::new();
    session.set_navigation_ready(true);
    let url = "https://eclaims.example.com/home";
    let outcome = dispatcher.dispatch(url, &session).await;

    assert_eq!(
        outcome,
        DispatchOutcome::LoginRequired {
            action: Action::Home,
            pending_stored: true
        }
    );
    assert_eq!(handler.0.load(Ordering::SeqCst), 0);
    assert_eq!(login.0.load(Ordering::SeqCst), 1);
    assert_eq!(*notifier.login_prompts.lock(), vec![Action::Home]);
    assert_eq!(session.pending_link().as_deref(), Some(url));
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn declined_login_keeps_nothing() {
    let navigator = Arc::new(RecordingNavigator::default());
    let notifier = Arc::new(RecordingNotifier::new(false));
    let config = LinkConfig {
        shared_secret: "scenario-shared-secret".into(),
        ..LinkConfig::default()
    };
    let runtime = LinkRuntime::from_config(
        config,
        navigator.clone(),
        Arc::new(MemoryStore::new()),
        notifier,
    )
    .unwrap();
    runtime.session().set_navigation_ready(true);

    let outcome = runtime
        .handle_url("https://eclaims.example.com/statements")
        .await;

    assert_eq!(
        outcome,
        DispatchOutcome::LoginRequired {
            action: Action::Statements,
            pending_stored: false
        }
    );
    assert_eq!(runtime.session().pending_link(), None);
    assert!(navigator.0.lock().is_empty());
}

#[tokio::test]
async fn token_on_session_only_action_is_refused() {
    let h = harness();
    let url = h
        .runtime
        .generator()
        .build_secure_link(
            Action::Camera,
            "user-1",
            &LinkParams::new(),
            &SecureLinkOptions::default(),
        )
        .unwrap();

    let outcome = h.runtime.handle_url(&url).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Rejected(LinkError::TokenNotAllowed(Action::Camera))
    );
    assert!(!h.runtime.session().is_authenticated());
    assert!(h.navigator.0.lock().is_empty());
    assert_eq!(h.notifier.errors.lock().len(), 1);
    assert!(h.runtime.services().identities.current().unwrap().is_none());
}

#[tokio::test]
async fn secure_token_signs_in_on_the_way() {
    let h = harness();
    let url = h
        .runtime
        .generator()
        .build_secure_link(
            Action::Vehicles,
            "user-77",
            &[("tab", "list")].into_iter().collect(),
            &SecureLinkOptions::default(),
        )
        .unwrap();

    let outcome = h.runtime.handle_url(&url).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Invoked {
            action: Action::Vehicles,
            token_authenticated: true
        }
    );
    assert!(h.runtime.session().is_authenticated());
    let identity = h.runtime.services().identities.current().unwrap().unwrap();
    assert_eq!(identity.user_id, "user-77");
    assert_eq!(h.navigator.0.lock()[0].params.get("tab"), Some("list"));
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let h = harness();
    let claims = serde_json::to_vec(&json!({"userId": "u1", "expiresAt": 1_000_000_000_000i64}))
        .unwrap();
    let token = format!("valid_{}", ec_crypto::encoding::encode_url_safe(&claims));

    let outcome = h
        .runtime
        .handle_url(&format!("https://eclaims.example.com/statements?token={token}"))
        .await;

    assert_eq!(
        outcome,
        DispatchOutcome::Rejected(LinkError::InvalidOrExpiredToken)
    );
    assert!(!h.runtime.session().is_authenticated());
}

async fn dispatch_secure_token_issued_at(h: &Harness, issued: i64, hours: f64) -> DispatchOutcome {
    let claims = json!({"userId": "user-late"}).as_object().cloned().unwrap();
    let token = h
        .runtime
        .services()
        .tokens
        .create_token_at(&claims, hours, issued)
        .unwrap();
    h.runtime
        .handle_url(&format!("https://eclaims.example.com/statements?token={token}"))
        .await
}

#[tokio::test]
async fn secure_token_past_its_exp_is_rejected() {
    let h = harness();
    let outcome = dispatch_secure_token_issued_at(&h, ec_crypto::now_ms() - 2_000, 0.0003).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Rejected(LinkError::InvalidOrExpiredToken)
    );
    assert!(!h.runtime.session().is_authenticated());
    assert!(h.runtime.services().identities.current().unwrap().is_none());
    assert!(h.navigator.0.lock().is_empty());
}

#[tokio::test]
async fn secure_token_in_stale_envelope_is_rejected() {
    let h = harness();
    let ten_minutes_ago = ec_crypto::now_ms() - 10 * 60 * 1000;
    let outcome = dispatch_secure_token_issued_at(&h, ten_minutes_ago, 1.0).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Rejected(LinkError::InvalidOrExpiredToken)
    );
    assert!(!h.runtime.session().is_authenticated());
    assert!(h.navigator.0.lock().is_empty());
}

#[tokio::test]
async fn unknown_and_empty_links_fall_back_to_home() {
    let h = harness();
    for url in [
        "https://eclaims.example.com/not-a-real-action",
        "https://eclaims.example.com/",
        "https://unknown.example.org/statement/abc",
    ] {
        let outcome = h.runtime.handle_url(url).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Invoked {
                action: Action::Home,
                token_authenticated: false
            }
        );
    }
    let routes = h.navigator.0.lock();
    assert_eq!(routes.len(), 3);
    assert!(routes.iter().all(|r| r.screen == "Home" && r.params.is_empty()));
}

#[tokio::test]
async fn non_url_input_shows_invalid_link() {
    let h = harness();
    let outcome = h.runtime.handle_url("definitely not a link").await;
    assert!(matches!(
        outcome,
        DispatchOutcome::Rejected(LinkError::MalformedUrl(_))
    ));
    assert!(h.notifier.errors.lock()[0].starts_with("Invalid link"));
}

#[tokio::test]
async fn newer_pending_link_wins_after_login() {
    let h = harness();
    let first = "https://eclaims.example.com/statement/first/view";
    let second = "https://eclaims.example.com/statement/second/edit";

    h.runtime.handle_url(first).await;
    h.runtime.handle_url(second).await;
    assert_eq!(h.runtime.session().pending_link().as_deref(), Some(second));

    let resumed = h.runtime.complete_login().await;
    assert_eq!(
        resumed,
        Some(DispatchOutcome::Invoked {
            action: Action::Statement,
            token_authenticated: false
        })
    );
    assert_eq!(h.runtime.complete_login().await, None);

    // two login redirects, one statement
    let routes = h.navigator.0.lock();
    let statements: Vec<_> = routes.iter().filter(|r| r.screen == "Statement").collect();
    assert_eq!(statements.len(), 1);
    assert_eq!(statements[0].params.get("statementId"), Some("second"));
    assert_eq!(routes.iter().filter(|r| r.screen == "Login").count(), 2);
}

#[tokio::test(start_paused = true)]
async fn navigation_wait_gives_up_after_ceiling() {
    let h = harness();
    h.runtime.session().set_navigation_ready(false);

    let started = tokio::time::Instant::now();
    let outcome = h.runtime.handle_url("https://eclaims.example.com/home").await;

    assert!(matches!(outcome, DispatchOutcome::Invoked { .. }));
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(h.navigator.screens(), vec!["Home"]);
}

#[tokio::test(start_paused = true)]
async fn navigation_wait_ends_when_ready() {
    let h = harness();
    let session = h.runtime.session().clone();
    session.set_navigation_ready(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(350)).await;
        session.set_navigation_ready(true);
    });

    let started = tokio::time::Instant::now();
    h.runtime.handle_url("https://eclaims.example.com/home").await;

    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(350));
    assert!(waited < Duration::from_secs(1));
}
