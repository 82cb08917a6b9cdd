// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle: change notifications and the terminal expiry path.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::store::{CredentialBundle, CredentialStore};

/// Events broadcast whenever credentials change underneath the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// An explicit login stored a new bundle.
    SignedIn { bundle: CredentialBundle },
    /// A refresh replaced the access token.
    Refreshed { bundle: CredentialBundle },
    /// Authentication could not be recovered; credentials were cleared.
    Expired,
    /// The user logged out.
    SignedOut,
}

/// Publish/subscribe hub for [`SessionEvent`]s. Delivery is fire-and-forget.
#[derive(Clone)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn notify_refreshed(&self, bundle: CredentialBundle) {
        self.publish(SessionEvent::Refreshed { bundle });
    }

    pub fn notify_signed_in(&self, bundle: CredentialBundle) {
        self.publish(SessionEvent::SignedIn { bundle });
    }

    pub fn publish(&self, event: SessionEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

/// Where the application currently is, and how to send it to login.
pub trait Navigator: Send + Sync {
    fn current_location(&self) -> String;
    fn redirect(&self, location: &str);
}

/// Navigator for the command-line front end: "redirecting" to login means
/// telling the user, once, to sign in again.
pub struct CliNavigator {
    location: Mutex<String>,
}

impl CliNavigator {
    pub fn new(location: impl Into<String>) -> Self {
        Self { location: Mutex::new(location.into()) }
    }
}

impl Navigator for CliNavigator {
    fn current_location(&self) -> String {
        self.location.lock().clone()
    }

    fn redirect(&self, location: &str) {
        *self.location.lock() = location.to_owned();
        eprintln!("Session expired. Run `harvest login` to sign in again.");
    }
}

/// Owns the transitions that end or begin a session.
pub struct SessionLifecycle {
    store: Arc<CredentialStore>,
    navigator: Arc<dyn Navigator>,
    events: SessionEvents,
    login_route: String,
}

impl SessionLifecycle {
    pub fn new(
        store: Arc<CredentialStore>,
        navigator: Arc<dyn Navigator>,
        events: SessionEvents,
        login_route: impl Into<String>,
    ) -> Self {
        Self { store, navigator, events, login_route: login_route.into() }
    }

    pub fn events(&self) -> &SessionEvents {
        &self.events
    }

    pub fn login_route(&self) -> &str {
        &self.login_route
    }

    /// Terminal path: clear everything, send the user to login unless they
    /// are already there, and tell subscribers.
    pub fn expire(&self) {
        self.store.clear_all();
        if self.navigator.current_location() == self.login_route {
            debug!(route = %self.login_route, "already at login, not redirecting");
        } else {
            warn!(route = %self.login_route, "session expired, redirecting to login");
            self.navigator.redirect(&self.login_route);
        }
        self.events.publish(SessionEvent::Expired);
    }

    /// Store a freshly issued bundle. Remembered logins go to the persistent
    /// scope; session-only logins to the ephemeral one. Leftovers of any
    /// earlier session are cleared first.
    pub fn begin(&self, bundle: CredentialBundle) {
        self.store.clear_all();
        if bundle.is_remembered() {
            self.store.write_remembered(&bundle);
            self.store.clear_auth_shadow();
        } else {
            self.store.write_session(&bundle);
        }
        info!(remembered = bundle.is_remembered(), "session started");
        self.events.notify_signed_in(bundle);
    }

    /// Explicit logout. No redirect; the user asked for it.
    pub fn end(&self) {
        self.store.clear_all();
        info!("session ended");
        self.events.publish(SessionEvent::SignedOut);
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
