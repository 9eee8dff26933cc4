use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::info;

/// Per-process link session state, passed explicitly into each dispatch.
#[derive(Debug, Default)]
pub struct SessionContext {
    authenticated: AtomicBool,
    navigation_ready: AtomicBool,
    pending_link: Mutex<Option<String>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn set_authenticated(&self, value: bool) {
        self.authenticated.store(value, Ordering::Release);
    }

    pub fn is_navigation_ready(&self) -> bool {
        self.navigation_ready.load(Ordering::Acquire)
    }

    /// Set by the host once its navigation stack is mounted.
    pub fn set_navigation_ready(&self, value: bool) {
        self.navigation_ready.store(value, Ordering::Release);
    }

    /// Single slot: a newer link replaces an unresolved one. Returns the
    /// link that was dropped.
    pub fn stash_pending_link(&self, url: impl Into<String>) -> Option<String> {
        let replaced = self.pending_link.lock().replace(url.into());
        if replaced.is_some() {
            info!("pending link overwritten by a newer link");
        }
        replaced
    }

    pub fn take_pending_link(&self) -> Option<String> {
        self.pending_link.lock().take()
    }

    pub fn pending_link(&self) -> Option<String> {
        self.pending_link.lock().clone()
    }
}
