use tracing::{info, warn};

use crate::action::Action;

/// User-facing side of the dispatcher: modal notices and the two choices
/// the link flow can ask for.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn show_error(&self, title: &str, message: &str);

    /// "Login Required" prompt. `true` means the user chose to log in.
    async fn confirm_login(&self, action: Action) -> bool;

    /// Offered after a failed token authentication. `true` retries.
    async fn offer_retry(&self, message: &str) -> bool;
}

/// Headless notifier: logs notices, accepts login, never retries.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait::async_trait]
impl Notifier for LoggingNotifier {
    fn show_error(&self, title: &str, message: &str) {
        warn!(%title, %message, "link notice");
    }

    async fn confirm_login(&self, action: Action) -> bool {
        info!(%action, "login required; proceeding to login");
        true
    }

    async fn offer_retry(&self, message: &str) -> bool {
        info!(%message, "authentication retry declined");
        false
    }
}
